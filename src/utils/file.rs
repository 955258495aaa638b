use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

use crate::config::defs::{TableFormat, COMPRESSION_EXTS, GZIP_EXT, TABLE_FORMATS};
use crate::utils::biom::{read_biom, write_biom};
use crate::utils::matrix::FeatureMatrix;
use crate::utils::tsv::{read_tsv, write_tsv};

pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1F, 0x8B]), // Gzip magic bytes
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}


/// Splits a file name into its stem and trailing extensions, keeping a compression suffix
/// together with the extension in front of it.
///
/// # Arguments
///
/// * `path` - Any file path.
///
/// # Returns
/// (stem path, extensions in order), e.g. `out.tsv.gz` -> (`out`, ["tsv", "gz"]).
pub fn extension_remover(path: &Path) -> (PathBuf, Vec<String>) {
    let mut stem = path.to_path_buf();
    let mut extensions = Vec::new();

    if let Some(ext) = stem.extension().map(|e| e.to_string_lossy().into_owned()) {
        let compressed = COMPRESSION_EXTS.iter().any(|c| c.eq_ignore_ascii_case(&ext));
        extensions.push(ext);
        stem.set_extension("");
        if compressed {
            if let Some(inner) = stem.extension().map(|e| e.to_string_lossy().into_owned()) {
                extensions.insert(0, inner);
                stem.set_extension("");
            }
        }
    }
    (stem, extensions)
}


/// Builds a path from a base, an optional parent directory, and optional prefix/suffix pieces.
///
/// # Arguments
///
/// * `file_path` - Base path; its file name becomes the stem of the result.
/// * `parent_dir` - Directory to place the result in. Defaults to the base's own parent.
/// * `prefix` - Prepended to the stem, joined with `delimiter`.
/// * `suffix` - Appended after the stem, joined with `delimiter`.
/// * `delimiter` - Joining string.
///
/// # Returns
/// PathBuf
pub fn file_path_manipulator(
    file_path: &Path,
    parent_dir: Option<&Path>,
    prefix: Option<&str>,
    suffix: Option<&str>,
    delimiter: &str,
) -> PathBuf {
    let file_name = file_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut name = String::new();
    if let Some(p) = prefix {
        name.push_str(p);
        name.push_str(delimiter);
    }
    name.push_str(&file_name);
    if let Some(s) = suffix {
        name.push_str(delimiter);
        name.push_str(s);
    }
    let parent = match parent_dir {
        Some(dir) => dir.to_path_buf(),
        None => file_path.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    parent.join(name)
}


/// Makes a path absolute against `cwd` without touching the filesystem.
pub fn absolutize(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}


/// Determines the table format from a path's extension(s).
///
/// # Arguments
///
/// * `path` - Table path, possibly with a compression suffix.
///
/// # Returns
/// Result<TableFormat>. Err for unknown extensions.
pub fn table_format(path: &Path) -> Result<TableFormat> {
    let (_, extensions) = extension_remover(path);
    for ext in &extensions {
        if let Some(format) = TABLE_FORMATS.get(ext.to_ascii_lowercase().as_str()) {
            if *format == TableFormat::Biom && extensions.len() > 1 {
                return Err(anyhow!("Compressed BIOM/HDF5 files are not supported: {}", path.display()));
            }
            return Ok(*format);
        }
    }
    let mut known: Vec<&str> = TABLE_FORMATS.keys().copied().collect();
    known.sort_unstable();
    Err(anyhow!(
        "File '{}' has unrecognised extension(s) {:?}. Expected one of {:?}",
        path.display(),
        extensions,
        known
    ))
}


/// File name used for a batch input, in the source table's format.
pub fn batch_input_name(split_id: usize, format: TableFormat) -> String {
    match format {
        TableFormat::Biom => format!("split_{}.biom", split_id),
        TableFormat::Tsv => format!("split_{}.tsv", split_id),
    }
}


pub fn load_table(path: &Path) -> Result<FeatureMatrix> {
    match table_format(path)? {
        TableFormat::Biom => read_biom(path),
        TableFormat::Tsv => read_tsv(path),
    }
}


/// Writes a table in the format implied by its extension. The data goes to a sibling
/// `.partial` file first and is renamed into place once complete.
pub fn save_table(matrix: &FeatureMatrix, path: &Path) -> Result<()> {
    let format = table_format(path)?;
    let partial = file_path_manipulator(path, None, Some(""), Some("partial"), ".");
    let written = match format {
        TableFormat::Biom => write_biom(matrix, &partial),
        TableFormat::Tsv => {
            let (_, extensions) = extension_remover(path);
            let gzip = extensions.last().map(|e| e.eq_ignore_ascii_case(GZIP_EXT)).unwrap_or(false);
            write_tsv(matrix, &partial, gzip)
        }
    };
    if let Err(e) = written {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    fs::rename(&partial, path)
        .map_err(|e| anyhow!("Failed to move {} into place: {}", partial.display(), e))?;
    Ok(())
}


/// True if the path is a regular file with at least one byte.
pub fn is_nonempty_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_remover() {
        let (stem, exts) = extension_remover(Path::new("/a/out.tsv.gz"));
        assert_eq!(stem, PathBuf::from("/a/out"));
        assert_eq!(exts, vec!["tsv".to_string(), "gz".to_string()]);

        let (stem, exts) = extension_remover(Path::new("out.biom"));
        assert_eq!(stem, PathBuf::from("out"));
        assert_eq!(exts, vec!["biom".to_string()]);

        let (stem, exts) = extension_remover(Path::new("results/out"));
        assert_eq!(stem, PathBuf::from("results/out"));
        assert!(exts.is_empty());
    }

    #[test]
    fn test_table_format() {
        assert_eq!(table_format(Path::new("x.biom")).unwrap(), TableFormat::Biom);
        assert_eq!(table_format(Path::new("x.H5")).unwrap(), TableFormat::Biom);
        assert_eq!(table_format(Path::new("x.tsv.gz")).unwrap(), TableFormat::Tsv);
        assert_eq!(table_format(Path::new("x.txt")).unwrap(), TableFormat::Tsv);
        assert!(table_format(Path::new("x.csv")).is_err());
        assert!(table_format(Path::new("x.biom.gz")).is_err());
    }

    #[test]
    fn test_file_path_manipulator() {
        let p = file_path_manipulator(Path::new("/data/out.biom"), None, Some(""), Some("partial"), ".");
        assert_eq!(p, PathBuf::from("/data/.out.biom.partial"));
        let p = file_path_manipulator(Path::new("out.biom"), Some(Path::new("/w")), None, None, "_");
        assert_eq!(p, PathBuf::from("/w/out.biom"));
    }
}
