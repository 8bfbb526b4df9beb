use std::fs;
use std::io;
use std::path::Path;

use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::error::SepiError;

const UNSAFE_FILE_CHARS: &[char] = &['|', '/', '\\', ':', '*', '?', '"', '<', '>'];

/// Replaces characters that are not portable in file names.
pub fn sanitize_file_component(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|ch| {
            if UNSAFE_FILE_CHARS.contains(&ch) || ch.is_control() {
                '_'
            } else {
                ch
            }
        })
        .collect()
}

/// Packs the regular files of `source_dir` (not recursing) into a deflated
/// archive, sorted by name so repeated runs produce the same entry order.
pub fn zip_dir(source_dir: &Path, zip_path: &Path) -> Result<usize, SepiError> {
    let mut files = fs::read_dir(source_dir)
        .map_err(|err| SepiError::Filesystem(format!("read {}: {err}", source_dir.display())))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect::<Vec<_>>();
    files.sort();

    let file = fs::File::create(zip_path)
        .map_err(|err| SepiError::Filesystem(format!("create zip {}: {err}", zip_path.display())))?;
    let mut archive = ZipWriter::new(file);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for path in &files {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| SepiError::Filesystem("non-utf8 file name in archive".to_string()))?;
        archive
            .start_file(name, options)
            .map_err(|err| SepiError::Filesystem(err.to_string()))?;
        let mut input =
            fs::File::open(path).map_err(|err| SepiError::Filesystem(err.to_string()))?;
        io::copy(&mut input, &mut archive).map_err(|err| SepiError::Filesystem(err.to_string()))?;
    }
    archive
        .finish()
        .map_err(|err| SepiError::Filesystem(err.to_string()))?;
    Ok(files.len())
}
