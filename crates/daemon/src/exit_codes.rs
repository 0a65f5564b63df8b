//! Process exit codes. Service managers and scripts rely on them.
//!
//! | Code | Meaning                                      |
//! |------|----------------------------------------------|
//! | 0    | Success                                      |
//! | 1    | Purge finished with per-item failures        |
//! | 2    | Bad configuration                            |
//! | 3    | Store could not be opened or migrated        |
//! | 4    | Installed applications could not be listed   |
//! | 5    | Watcher could not be started                 |

pub const EXIT_SUCCESS: u8 = 0;

/// A purge ran to completion but some items failed.
pub const EXIT_PURGE_PARTIAL: u8 = 1;

pub const EXIT_CONFIG: u8 = 2;

pub const EXIT_STORE: u8 = 3;

/// The enumerator failed, so nothing was touched.
pub const EXIT_ENUMERATE: u8 = 4;

pub const EXIT_WATCH: u8 = 5;
