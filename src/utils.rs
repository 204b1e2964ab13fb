// utils.rs - 公共工具模組
//
// 提供時間戳、目錄佈局與檔案樹複製等通用工具。

pub mod directories;
pub mod fs_utils;
pub mod time_utils;

pub use directories::Directories;
pub use fs_utils::{copy_dir_recursive, replace_in_file};
pub use time_utils::{current_timestamp_ms, elapsed_since_ms};
