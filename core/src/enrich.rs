//! Background population of the expensive entry attributes.
//!
//! Every request runs as its own task behind two limiters: metadata lookups
//! and non-cached thumbnail generation. Results are tagged with the load
//! generation they were requested for and dropped if a newer load started in
//! the meantime.

use std::{
	collections::HashMap,
	fmt::Display,
	path::Path,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
};

use chrono::Local;
use fm_utils::chain_optional_iter;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, Instrument};

use crate::{
	collaborators::{CollaboratorResult, Collaborators},
	config::EnrichmentConfig,
	entry::{EntryId, EntryRef, SyncStatus},
	events::{DirectoryEvent, EventBus},
};

#[derive(Debug)]
struct EnricherState {
	generation: u64,
	root: CancellationToken,
	/// In-flight requests, tagged with the request number that owns the token
	items: HashMap<EntryId, (u64, CancellationToken)>,
	next_request: u64,
}

struct EnricherInner {
	collaborators: Collaborators,
	config: EnrichmentConfig,
	events: EventBus,
	metadata_limiter: Semaphore,
	thumbnail_limiter: Semaphore,
	state: Mutex<EnricherState>,
	inflight: AtomicUsize,
	idle_tx: mpsc::UnboundedSender<u64>,
}

#[derive(Clone)]
pub struct Enricher {
	inner: Arc<EnricherInner>,
}

impl Enricher {
	/// The receiver yields the generation whenever the enricher runs out of work
	pub fn new(
		collaborators: Collaborators,
		config: EnrichmentConfig,
		events: EventBus,
	) -> (Self, mpsc::UnboundedReceiver<u64>) {
		let (idle_tx, idle_rx) = mpsc::unbounded_channel();

		let inner = EnricherInner {
			metadata_limiter: Semaphore::new(config.metadata_concurrency.max(1)),
			thumbnail_limiter: Semaphore::new(config.thumbnail_concurrency.max(1)),
			collaborators,
			config,
			events,
			state: Mutex::new(EnricherState {
				generation: 0,
				root: CancellationToken::new(),
				items: HashMap::new(),
				next_request: 0,
			}),
			inflight: AtomicUsize::new(0),
			idle_tx,
		};

		(
			Self {
				inner: Arc::new(inner),
			},
			idle_rx,
		)
	}

	pub fn generation(&self) -> u64 {
		self.inner.state.lock().generation
	}

	pub fn inflight(&self) -> usize {
		self.inner.inflight.load(Ordering::Acquire)
	}

	/// Queue enrichment of `entry` on behalf of the load `generation`
	pub fn request(&self, entry: EntryRef, generation: u64) {
		if entry.props().properties_initialized {
			return;
		}

		let (request, token) = {
			let mut state = self.inner.state.lock();
			if state.generation != generation {
				trace!(path = %entry.path().display(), "Ignoring enrichment for a stale load");
				return;
			}
			if state.items.contains_key(&entry.id()) {
				return;
			}

			let request = state.next_request;
			state.next_request += 1;

			let token = state.root.child_token();
			state.items.insert(entry.id(), (request, token.clone()));
			(request, token)
		};

		self.inner.inflight.fetch_add(1, Ordering::AcqRel);

		let inner = Arc::clone(&self.inner);
		tokio::spawn(
			async move {
				tokio::select! {
					biased;
					() = token.cancelled() => {
						trace!(path = %entry.path().display(), "Enrichment cancelled");
					}
					() = inner.enrich(&entry, generation, &token) => {}
				}

				{
					// A newer request for the same entry may own the slot by now
					let mut state = inner.state.lock();
					if state
						.items
						.get(&entry.id())
						.is_some_and(|(owner, _)| *owner == request)
					{
						state.items.remove(&entry.id());
					}
				}

				if inner.inflight.fetch_sub(1, Ordering::AcqRel) == 1
					&& inner.idle_tx.send(generation).is_err()
				{
					trace!("Nobody is listening for enricher idle signals");
				}
			}
			.in_current_span(),
		);
	}

	pub fn cancel_item(&self, id: EntryId) {
		if let Some((_, token)) = self.inner.state.lock().items.remove(&id) {
			token.cancel();
		}
	}

	/// Cancel everything in flight and only accept requests for `new_generation`
	pub fn cancel_all(&self, new_generation: u64) {
		let mut state = self.inner.state.lock();
		state.root.cancel();
		state.root = CancellationToken::new();
		state.items.clear();
		state.generation = new_generation;
	}
}

impl EnricherInner {
	/// Results may only be applied while the request is neither cancelled nor stale
	fn should_apply(&self, generation: u64, token: &CancellationToken) -> bool {
		!token.is_cancelled() && self.state.lock().generation == generation
	}

	async fn enrich(&self, entry: &EntryRef, generation: u64, token: &CancellationToken) {
		let path = entry.path();
		let size = self.config.thumbnail_size;
		let Collaborators {
			icons,
			cloud,
			tags: tag_store,
			file_references,
			properties,
			..
		} = &self.collaborators;

		let has_cached_thumbnail = {
			let Ok(_permit) = self.metadata_limiter.acquire().await else {
				return;
			};

			let cached = local(icons.thumbnail(path, size, true).await, "thumbnail", path);
			let has_cached_thumbnail = cached.is_some();
			let thumbnail = match cached {
				Some(thumbnail) => Some(thumbnail),
				None => local(icons.icon(path, entry.is_dir(), size).await, "icon", path),
			};
			let overlay = local(icons.overlay(path).await, "overlay", path);

			let sync_status = cloud.sync_status(path).await.unwrap_or_else(|e| {
				debug!(?e, path = %path.display(), "Unable to query sync status;");
				SyncStatus::Unknown
			});
			let file_reference = local(
				file_references.file_reference(path).await,
				"file reference",
				path,
			);
			let tags = local(tag_store.tags_for(path, file_reference).await, "tags", path);
			let display_type = local(properties.display_type(entry).await, "display type", path);
			let extended = local(properties.extended(entry).await, "properties", path);

			let contextual_property = chain_optional_iter(
				[],
				[
					extended.dimensions.clone(),
					extended.duration.clone(),
					extended.version.clone(),
				],
			)
			.into_iter()
			.next()
			.or_else(|| {
				entry.props().modified.map(|modified| {
					format!(
						"Modified: {}",
						modified.with_timezone(&Local).format("%Y-%m-%d %H:%M")
					)
				})
			});

			if !self.should_apply(generation, token) {
				trace!(path = %path.display(), "Dropping cancelled or stale enrichment");
				return;
			}

			entry.update(|props| {
				props.thumbnail = thumbnail.map(Arc::from);
				props.overlay = overlay.map(Arc::from);
				props.sync_status = sync_status;
				props.file_reference = file_reference;
				props.tags = tags.clone();
				props.display_type = display_type;
				props.dimensions = extended.dimensions;
				props.duration = extended.duration;
				props.version = extended.version;
				props.contextual_property = contextual_property;
				props.properties_initialized = true;
			});

			if let Err(e) = tag_store.persist(path, file_reference, &tags).await {
				debug!(?e, path = %path.display(), "Unable to persist tags;");
			}

			self.events
				.emit(DirectoryEvent::EntryUpdated(EntryRef::clone(entry)));

			has_cached_thumbnail
		};

		if has_cached_thumbnail || entry.is_dir() {
			return;
		}

		let Ok(_permit) = self.thumbnail_limiter.acquire().await else {
			return;
		};

		if let Some(thumbnail) =
			local(icons.thumbnail(path, size, false).await, "thumbnail", path)
		{
			if !self.should_apply(generation, token) {
				return;
			}

			entry.update(|props| props.thumbnail = Some(Arc::from(thumbnail)));
			self.events
				.emit(DirectoryEvent::EntryUpdated(EntryRef::clone(entry)));
		}
	}
}

/// Failures stay local to the attribute; the entry keeps its default
fn local<T: Default>(result: CollaboratorResult<T>, what: impl Display, path: &Path) -> T {
	result.unwrap_or_else(|e| {
		debug!(?e, %what, path = %path.display(), "Enrichment step failed;");
		T::default()
	})
}
