//! Общие константы формата снапшота (header, names, payload, catalog).

// -------- Header --------
// [magic3 = "USX"][version u8]
pub const SAVE_MAGIC: &[u8; 3] = b"USX";
pub const SAVE_VERSION_CURRENT: u8 = 1;

// -------- Files --------
pub const SAVE_EXT: &str = "usx";
pub const COMPRESSED_EXT: &str = "zst";
pub const DEFAULT_SAVE_DIR: &str = "Save";

// -------- Names --------
// Имя пишется как сырые байты + '\0'; вместе с терминатором не длиннее NAME_SIZE.
pub const NAME_SIZE: usize = 64;
// Встроенные нулевые байты заменяются на '_' при записи.
pub const NAME_ZERO_SUBST: u8 = b'_';
// Индекс 0 в таблице имён всегда занят этим sentinel.
pub const NAME_NONE: &str = "None";

// -------- Limits --------
pub const MAX_STRING_LEN: usize = 1 << 20; // 1 MiB
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 16 << 20; // 16 MiB
pub const MAX_TABLE_LEN: usize = 1 << 24;

// -------- Built-in objects --------
pub const CORE_PACKAGE: &str = "Core";
pub const CLASS_CLASS: &str = "Class";
pub const PACKAGE_CLASS: &str = "Package";
pub const TRANSIENT_PACKAGE: &str = "Transient";

// Классы, которые никогда не попадают в снапшот (по умолчанию).
pub const DEFAULT_EXCLUDE_CLASSES: &[&str] = &["StatLog"];
