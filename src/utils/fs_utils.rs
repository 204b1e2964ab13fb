use std::fs;
use std::io;
use std::path::Path;

/// 遞迴複製整個目錄樹，目標目錄不存在時自動建立
pub fn copy_dir_recursive(source: &Path, destination: &Path) -> io::Result<()> {
    fs::create_dir_all(destination)?;

    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = destination.join(entry.file_name());

        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

/// 將檔案中所有 `placeholder` 替換為 `value`，返回是否有內容被替換
pub fn replace_in_file(path: &Path, placeholder: &str, value: &str) -> io::Result<bool> {
    let content = fs::read_to_string(path)?;
    if !content.contains(placeholder) {
        return Ok(false);
    }

    fs::write(path, content.replace(placeholder, value))?;
    Ok(true)
}
