// src/utils/biom.rs: BIOM 2.1 (HDF5) reading and writing

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use hdf5_metno::types::{VarLenAscii, VarLenUnicode};
use hdf5_metno::{Extent, File, Group, H5Type, Location};
use ndarray::arr1;

use crate::config::defs::{BIOM_FORMAT_URL, BIOM_TABLE_TYPE, GENERATED_BY, HDF5_CHUNK_SIZE};
use crate::utils::matrix::FeatureMatrix;


/// Writes a matrix as a BIOM 2.1 HDF5 file.
///
/// Both axes are written: `observation/matrix` holds the CSR arrays and `sample/matrix` the
/// CSC arrays, with int32 indices as the format requires.
///
/// # Arguments
///
/// * `matrix` - Table to write.
/// * `path` - Destination file, truncated if present.
///
/// # Returns
/// anyhow::Result<()>
///
pub fn write_biom(matrix: &FeatureMatrix, path: &Path) -> Result<()> {
    let nnz = to_i32(matrix.nnz(), "nnz")?;
    let nrows = to_i32(matrix.n_observations(), "observation count")?;
    let ncols = to_i32(matrix.n_samples(), "sample count")?;

    let file = File::create(path).with_context(|| format!("Cannot create {}", path.display()))?;

    write_str_attr(&file, "id", &matrix.table_id)?;
    write_str_attr(&file, "type", BIOM_TABLE_TYPE)?;
    write_str_attr(&file, "format-url", BIOM_FORMAT_URL)?;
    write_str_attr(&file, "generated-by", GENERATED_BY)?;
    let created = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
    write_str_attr(&file, "creation-date", &created)?;
    file.new_attr_builder()
        .with_data(&arr1(&[2i32, 1]))
        .create("format-version")?;
    file.new_attr_builder()
        .with_data(&arr1(&[nrows, ncols]))
        .create("shape")?;
    file.new_attr::<i32>().create("nnz")?.write_scalar(&nnz)?;

    let (csr_indptr, csr_indices, csr_data) = matrix.to_csr();
    write_axis(&file, "observation", matrix.observation_ids(), &csr_indptr, &csr_indices, &csr_data)?;

    let (csc_indptr, csc_indices, csc_data) = matrix.csc_parts();
    write_axis(&file, "sample", matrix.sample_ids(), csc_indptr, csc_indices, csc_data)?;

    file.flush()?;
    Ok(())
}

fn write_axis(
    file: &File,
    axis: &str,
    ids: &[String],
    indptr: &[usize],
    indices: &[usize],
    data: &[f64],
) -> Result<()> {
    let group = file.create_group(axis)?;
    group.create_group("metadata")?;
    group.create_group("group-metadata")?;

    let id_buffer = ids
        .iter()
        .map(|id| {
            id.parse::<VarLenUnicode>()
                .map_err(|e| anyhow!("Invalid {} id '{}': {}", axis, id, e))
        })
        .collect::<Result<Vec<VarLenUnicode>>>()?;
    write_dataset(&group, "ids", &id_buffer, false)?;

    let matrix_group = group.create_group("matrix")?;
    write_dataset(&matrix_group, "data", data, true)?;
    let indices = indices
        .iter()
        .map(|&i| to_i32(i, "index"))
        .collect::<Result<Vec<i32>>>()?;
    write_dataset(&matrix_group, "indices", &indices, true)?;
    let indptr = indptr
        .iter()
        .map(|&i| to_i32(i, "indptr"))
        .collect::<Result<Vec<i32>>>()?;
    write_dataset(&matrix_group, "indptr", &indptr, true)?;
    Ok(())
}

/// Creates a resizable 1-D dataset and fills it. Zero-length datasets stay at extent 0.
fn write_dataset<T: H5Type>(group: &Group, name: &str, values: &[T], compress: bool) -> Result<()> {
    let builder = group
        .new_dataset::<T>()
        .shape([Extent::resizable(0)])
        .chunk([HDF5_CHUNK_SIZE]);
    let dataset = if compress {
        builder.shuffle().deflate(6).create(name)?
    } else {
        builder.create(name)?
    };
    if !values.is_empty() {
        dataset.resize([values.len()])?;
        dataset.write_slice(values, 0..values.len())?;
    }
    Ok(())
}

fn write_str_attr(location: &Location, name: &str, value: &str) -> Result<()> {
    let value: VarLenUnicode = value
        .parse()
        .map_err(|e| anyhow!("Invalid attribute {}='{}': {}", name, value, e))?;
    location
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn to_i32(value: usize, what: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| anyhow!("BIOM {} {} exceeds the int32 range", what, value))
}


/// Reads a BIOM 2.1 HDF5 file via its sample-major (CSC) matrix.
///
/// # Arguments
///
/// * `path` - BIOM file.
///
/// # Returns
/// anyhow::Result<FeatureMatrix>
///
pub fn read_biom(path: &Path) -> Result<FeatureMatrix> {
    let file = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;

    let table_id = read_str_attr(&file, "id").unwrap_or_else(|_| {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    });

    let observation_ids = read_ids(&file, "observation/ids")?;
    let sample_ids = read_ids(&file, "sample/ids")?;

    if let Ok(attr) = file.attr("shape") {
        let shape = attr.read_raw::<i64>()?;
        if shape.len() != 2
            || shape[0] as usize != observation_ids.len()
            || shape[1] as usize != sample_ids.len()
        {
            return Err(anyhow!(
                "{}: shape attribute {:?} does not match {} observations x {} samples",
                path.display(),
                shape,
                observation_ids.len(),
                sample_ids.len()
            ));
        }
    }

    let data = file.dataset("sample/matrix/data")?.read_raw::<f64>()?;
    let indices = read_index_array(&file, "sample/matrix/indices")?;
    let indptr = read_index_array(&file, "sample/matrix/indptr")?;
    // A table with no samples may be stored without an indptr entry.
    let indptr = if indptr.is_empty() { vec![0] } else { indptr };

    FeatureMatrix::from_csc(&table_id, observation_ids, sample_ids, indptr, indices, data)
        .with_context(|| format!("Invalid BIOM matrix in {}", path.display()))
}

fn read_ids(file: &File, name: &str) -> Result<Vec<String>> {
    let dataset = file.dataset(name)?;
    match dataset.read_raw::<VarLenUnicode>() {
        Ok(ids) => Ok(ids.iter().map(|s| s.as_str().to_string()).collect()),
        Err(_) => {
            let ids = dataset
                .read_raw::<VarLenAscii>()
                .with_context(|| format!("Cannot read string dataset {}", name))?;
            Ok(ids.iter().map(|s| s.as_str().to_string()).collect())
        }
    }
}

fn read_index_array(file: &File, name: &str) -> Result<Vec<usize>> {
    file.dataset(name)?
        .read_raw::<i64>()?
        .into_iter()
        .map(|v| usize::try_from(v).map_err(|_| anyhow!("Negative value {} in {}", v, name)))
        .collect()
}

fn read_str_attr(location: &Location, name: &str) -> Result<String> {
    let value = location.attr(name)?.read_scalar::<VarLenUnicode>()?;
    Ok(value.as_str().to_string())
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_biom_write_read() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("table.biom");
        let m = FeatureMatrix::from_dense(
            "Regrouped table",
            vec!["RXN-1".into(), "RXN-2".into(), "UNGROUPED".into()],
            vec!["S1".into(), "S2".into()],
            &[vec![1.5, 0.0], vec![0.0, 0.0], vec![3.0, 4.25]],
        )?;
        write_biom(&m, &path)?;
        let back = read_biom(&path)?;
        assert_eq!(back.table_id, "Regrouped table");
        assert_eq!(back.observation_ids(), m.observation_ids());
        assert!(m.same_content(&back));
        Ok(())
    }

    #[test]
    fn test_biom_empty_matrix() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("empty.biom");
        let m = FeatureMatrix::from_triplets("empty", vec!["f".into()], vec!["s".into()], vec![])?;
        write_biom(&m, &path)?;
        let back = read_biom(&path)?;
        assert_eq!(back.nnz(), 0);
        assert_eq!(back.n_samples(), 1);
        Ok(())
    }
}
