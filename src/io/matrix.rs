use std::path::Path;

use anyhow::{ensure, Context, Result};
use nalgebra::DMatrix;

use crate::io::error::MrpError;

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledMatrix {
    pub row_labels: Vec<String>,
    pub col_labels: Vec<String>,
    pub matrix: DMatrix<f64>,
}

impl LabeledMatrix {
    /// Reorder rows and columns to follow `labels`. Every label must be
    /// present among both the row and the column labels.
    pub fn aligned_to(&self, labels: &[String]) -> Result<DMatrix<f64>> {
        let position = |axis: &[String], label: &String| {
            axis.iter()
                .position(|x| x == label)
                .with_context(|| format!("Label {} not found in matrix", label))
        };
        let rows = labels
            .iter()
            .map(|l| position(&self.row_labels, l))
            .collect::<Result<Vec<usize>>>()?;
        let cols = labels
            .iter()
            .map(|l| position(&self.col_labels, l))
            .collect::<Result<Vec<usize>>>()?;
        Ok(DMatrix::from_fn(labels.len(), labels.len(), |i, j| {
            self.matrix[(rows[i], cols[j])]
        }))
    }
}

/// Read a matrix from a file
pub fn read_labeled_matrix(filename: &str) -> Result<LabeledMatrix> {
    let mut reader = csv_sniffer::Sniffer::new().open_path(filename)?;

    let mut row_labels = Vec::new();
    let mut matrix = Vec::new();

    // Read the col_labels from the reader header property
    let col_labels: Vec<String> = reader
        .headers()?
        .clone()
        .iter()
        .skip(1)
        .map(|x| x.to_string())
        .collect();

    for result in reader.records() {
        let record = result.map_err(MrpError::from)?;
        for (i, value) in record.iter().enumerate() {
            if i == 0 {
                row_labels.push(value.to_string());
            } else {
                let parsed = value.trim().parse::<f64>().map_err(|_| MrpError::InvalidValue {
                    column: col_labels.get(i - 1).cloned().unwrap_or_default(),
                    value: value.to_string(),
                })?;
                matrix.push(parsed);
            }
        }
    }

    ensure!(
        matrix.len() == row_labels.len() * col_labels.len(),
        "Matrix in {} is not rectangular",
        filename
    );

    // Convert the matrix to a DMatrix
    let matrix = DMatrix::from_row_slice(row_labels.len(), col_labels.len(), &matrix);

    Ok(LabeledMatrix {
        row_labels,
        col_labels,
        matrix,
    })
}

/// Write a square matrix with the same labels on both axes, tab-separated.
pub fn write_labeled_matrix(
    matrix: &DMatrix<f64>,
    labels: &[String],
    filename: &Path,
) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(filename)?;

    let mut header = vec!["label".to_string()];
    header.extend(labels.iter().cloned());
    writer.write_record(&header)?;

    for (idx, row) in matrix.row_iter().enumerate() {
        let mut row_vec = vec![labels[idx].clone()];
        row_vec.extend(row.iter().map(|x| x.to_string()));
        writer.write_record(&row_vec)?;
    }
    writer.flush()?;

    Ok(())
}
