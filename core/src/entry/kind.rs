use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Coarse classification of an entry, resolved from its extension
#[derive(
	Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString,
)]
pub enum FileKind {
	// A file that can not be identified by its extension
	#[default]
	Unknown,
	Document,
	Folder,
	// A file that contains human-readable text
	Text,
	// A directory that is presented as a single file, like an app bundle
	Package,
	Image,
	Audio,
	Video,
	// A compressed archive of data
	Archive,
	// An executable, program or application
	Executable,
	// A link to another file
	Alias,
	Encrypted,
	Key,
	Font,
	// 3D Object
	Mesh,
	// Editable source code file
	Code,
	Database,
}

impl FileKind {
	pub fn from_extension(extension: &str) -> Self {
		match extension.to_ascii_lowercase().as_str() {
			"pdf" | "doc" | "docx" | "odt" | "rtf" | "xls" | "xlsx" | "ods" | "ppt" | "pptx"
			| "odp" | "epub" => Self::Document,
			"txt" | "md" | "log" | "csv" | "ini" | "cfg" => Self::Text,
			"app" | "apk" | "appx" | "msix" => Self::Package,
			"png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp" | "tif" | "tiff" | "heic" | "heif"
			| "svg" | "ico" | "avif" | "raw" | "cr2" | "nef" => Self::Image,
			"mp3" | "flac" | "wav" | "ogg" | "m4a" | "aac" | "opus" | "wma" => Self::Audio,
			"mp4" | "mkv" | "mov" | "avi" | "webm" | "wmv" | "m4v" | "flv" => Self::Video,
			"zip" | "7z" | "rar" | "tar" | "gz" | "tgz" | "bz2" | "xz" | "zst" | "cab" => {
				Self::Archive
			}
			"exe" | "msi" | "bat" | "cmd" | "com" | "sh" | "bin" => Self::Executable,
			"lnk" | "url" | "webloc" | "desktop" => Self::Alias,
			"gpg" | "pgp" | "age" | "aes" => Self::Encrypted,
			"pem" | "key" | "crt" | "cer" | "p12" | "pfx" | "pub" => Self::Key,
			"ttf" | "otf" | "woff" | "woff2" => Self::Font,
			"obj" | "fbx" | "stl" | "gltf" | "glb" | "3mf" => Self::Mesh,
			"rs" | "c" | "h" | "cpp" | "hpp" | "cs" | "java" | "kt" | "go" | "py" | "js" | "ts"
			| "tsx" | "jsx" | "json" | "toml" | "yaml" | "yml" | "xml" | "html" | "css" | "sql"
			| "swift" | "rb" | "php" => Self::Code,
			"db" | "sqlite" | "sqlite3" | "mdb" | "accdb" => Self::Database,
			_ => Self::Unknown,
		}
	}

	/// Archives browse like folders but sort and group as files
	pub fn is_archive(self) -> bool {
		matches!(self, Self::Archive)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn extensions_are_case_insensitive() {
		assert_eq!(FileKind::from_extension("PNG"), FileKind::Image);
		assert_eq!(FileKind::from_extension("Zip"), FileKind::Archive);
		assert_eq!(FileKind::from_extension("whatever"), FileKind::Unknown);
		assert!(FileKind::from_extension("7z").is_archive());
	}
}
