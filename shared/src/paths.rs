use std::path::{Path, PathBuf};

/// Canonicalize a path and strip the Windows verbatim prefix (`\\?\`) so the
/// result stays comparable with plain paths.
pub fn canonicalize_with_strip<P: AsRef<Path>>(path: P) -> std::io::Result<PathBuf> {
    let canonical = fs_err::canonicalize(path.as_ref())?;

    #[cfg(windows)]
    {
        let as_str = canonical.to_string_lossy();
        if let Some(stripped) = as_str.strip_prefix(r"\\?\") {
            return Ok(PathBuf::from(stripped));
        }
    }

    Ok(canonical)
}
