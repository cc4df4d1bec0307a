use std::fs;
use std::io;
use std::path::Path;

/// 先寫入同層暫存檔再改名，達成原子寫入。 / Writes through a sibling temp file and a rename.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, data)?;
    fs::rename(&tmp_path, path)
}
