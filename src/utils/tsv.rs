// src/utils/tsv.rs: classic tab-separated BIOM / HUMAnN tables

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::utils::file::is_gzipped;
use crate::utils::matrix::FeatureMatrix;

const TSV_COMMENT: &str = "# Constructed from biom file";
const TSV_ROW_LABEL: &str = "#OTU ID";
const METADATA_COLUMN: &str = "taxonomy";


/// Reads a tab-separated table, gzipped or plain.
///
/// Leading `#` lines are comments; the last of them is the header (`#OTU ID`, `# Gene Family`,
/// ...). A table with no comment lines uses its first line as header. A trailing `taxonomy`
/// column is metadata and is skipped.
///
/// # Arguments
///
/// * `path` - Table path.
///
/// # Returns
/// anyhow::Result<FeatureMatrix>
pub fn read_tsv(path: &Path) -> Result<FeatureMatrix> {
    let file = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    let reader: Box<dyn Read> = if is_gzipped(path)? {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let table_id = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    parse_tsv(BufReader::new(reader), &table_id)
        .with_context(|| format!("Invalid table {}", path.display()))
}


pub fn parse_tsv<R: BufRead>(reader: R, table_id: &str) -> Result<FeatureMatrix> {
    let mut header: Option<String> = None;
    let mut in_comments = true;
    let mut observation_ids = Vec::new();
    let mut sample_ids: Vec<String> = Vec::new();
    let mut has_metadata = false;
    let mut triplets = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        if in_comments {
            if line.starts_with('#') {
                header = Some(line.to_string());
                continue;
            }
            in_comments = false;
            let header_line = match header.take() {
                Some(h) => h,
                None => {
                    // No comment block: this line is the header.
                    let (ids, meta) = parse_header(line);
                    sample_ids = ids;
                    has_metadata = meta;
                    continue;
                }
            };
            let (ids, meta) = parse_header(&header_line);
            sample_ids = ids;
            has_metadata = meta;
        }

        let mut fields = line.split('\t');
        let observation_id = fields.next().unwrap_or_default().to_string();
        let values: Vec<&str> = fields.collect();
        let expected = sample_ids.len() + usize::from(has_metadata);
        if values.len() != expected {
            return Err(anyhow!(
                "Line {}: {} value(s) for {} sample(s)",
                line_no + 1,
                values.len(),
                sample_ids.len()
            ));
        }
        let row = observation_ids.len();
        observation_ids.push(observation_id);
        for (col, raw) in values.iter().take(sample_ids.len()).enumerate() {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let value: f64 = raw
                .parse()
                .map_err(|_| anyhow!("Line {}: cannot parse '{}' as a number", line_no + 1, raw))?;
            if value != 0.0 {
                triplets.push((row, col, value));
            }
        }
    }

    if in_comments {
        // Header only, or nothing at all.
        if let Some(h) = header {
            let (ids, _) = parse_header(&h);
            sample_ids = ids;
        }
    }

    FeatureMatrix::from_triplets(table_id, observation_ids, sample_ids, triplets)
}

fn parse_header(line: &str) -> (Vec<String>, bool) {
    let mut ids: Vec<String> = line.split('\t').skip(1).map(|s| s.trim().to_string()).collect();
    let has_metadata = ids
        .last()
        .map(|s| s.eq_ignore_ascii_case(METADATA_COLUMN))
        .unwrap_or(false);
    if has_metadata {
        ids.pop();
    }
    (ids, has_metadata)
}


/// Writes a table as classic BIOM TSV.
///
/// # Arguments
///
/// * `matrix` - Table to write.
/// * `path` - Destination file.
/// * `gzip` - Compress the output.
///
/// # Returns
/// anyhow::Result<()>
pub fn write_tsv(matrix: &FeatureMatrix, path: &Path, gzip: bool) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Cannot create {}", path.display()))?;
    if gzip {
        let mut writer = BufWriter::new(GzEncoder::new(file, Compression::default()));
        format_tsv(matrix, &mut writer)?;
        writer
            .into_inner()
            .map_err(|e| anyhow!("Failed to flush {}: {}", path.display(), e))?
            .finish()?;
    } else {
        let mut writer = BufWriter::new(file);
        format_tsv(matrix, &mut writer)?;
        writer.flush()?;
    }
    Ok(())
}


pub fn format_tsv<W: Write>(matrix: &FeatureMatrix, writer: &mut W) -> Result<()> {
    writeln!(writer, "{}", TSV_COMMENT)?;
    write!(writer, "{}", TSV_ROW_LABEL)?;
    for sample in matrix.sample_ids() {
        write!(writer, "\t{}", sample)?;
    }
    writeln!(writer)?;

    let (indptr, indices, data) = matrix.to_csr();
    let n_samples = matrix.n_samples();
    let mut row_values = vec![0f64; n_samples];
    for (row, observation) in matrix.observation_ids().iter().enumerate() {
        row_values.iter_mut().for_each(|v| *v = 0.0);
        for k in indptr[row]..indptr[row + 1] {
            row_values[indices[k]] = data[k];
        }
        write!(writer, "{}", observation)?;
        for value in &row_values {
            write!(writer, "\t{}", value)?;
        }
        writeln!(writer)?;
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_humann_header() -> Result<()> {
        let text = "# Gene Family\tS1_Abundance\tS2_Abundance\nUniRef90_A\t1.5\t0\nUNMAPPED\t0\t3\n";
        let m = parse_tsv(Cursor::new(text), "genefamilies")?;
        assert_eq!(m.sample_ids(), &["S1_Abundance".to_string(), "S2_Abundance".to_string()]);
        assert_eq!(m.observation_ids(), &["UniRef90_A".to_string(), "UNMAPPED".to_string()]);
        assert_eq!(m.get("UniRef90_A", "S1_Abundance"), Some(1.5));
        assert_eq!(m.nnz(), 2);
        Ok(())
    }

    #[test]
    fn test_parse_biom_tsv_with_taxonomy() -> Result<()> {
        let text = "# Constructed from biom file\n#OTU ID\ta\tb\ttaxonomy\nO1\t1\t2\tk__Bacteria\n";
        let m = parse_tsv(Cursor::new(text), "t")?;
        assert_eq!(m.n_samples(), 2);
        assert_eq!(m.get("O1", "b"), Some(2.0));
        Ok(())
    }

    #[test]
    fn test_parse_rejects_ragged_rows() {
        let text = "#OTU ID\ta\tb\nO1\t1\n";
        assert!(parse_tsv(Cursor::new(text), "t").is_err());
    }

    #[test]
    fn test_format_then_parse() -> Result<()> {
        let m = FeatureMatrix::from_dense(
            "t",
            vec!["f1".into(), "f2".into()],
            vec!["s1".into(), "s2".into()],
            &[vec![0.25, 0.0], vec![7.0, 1e-9]],
        )?;
        let mut buf = Vec::new();
        format_tsv(&m, &mut buf)?;
        let text = String::from_utf8(buf)?;
        assert!(text.starts_with("# Constructed from biom file\n#OTU ID\ts1\ts2\n"));
        let back = parse_tsv(Cursor::new(text), "t")?;
        assert!(m.same_content(&back));
        Ok(())
    }
}
