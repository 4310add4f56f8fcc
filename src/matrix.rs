use miette::Error;

use crate::error::RuntimeError;
use crate::quantity::Quantity;

/// One cell of a matrix. Nested matrices are display-only structure;
/// indexing addresses the top grid.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Quantity(Quantity),
    Text(String),
    Nested(Matrix),
}

/// A rectangular grid of heterogeneous cells. Rows are ordered and of equal
/// length; a single-column matrix doubles as a list.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: Vec<Vec<Cell>>,
}

impl Matrix {
    pub fn new(rows: Vec<Vec<Cell>>) -> Result<Matrix, Error> {
        let expected = rows.first().map_or(0, Vec::len);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != expected {
                return Err(RuntimeError::RaggedMatrix {
                    row: i + 1,
                    got: row.len(),
                    expected,
                }
                .into());
            }
        }
        Ok(Matrix { rows })
    }

    /// N×1 column from a flat list.
    pub fn column(cells: Vec<Cell>) -> Matrix {
        Matrix {
            rows: cells.into_iter().map(|c| vec![c]).collect(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn col_count(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    // 1-based; negative counts from the end (-1 is the last)
    fn normalize(idx: i64, len: usize, axis: &str) -> Result<usize, Error> {
        let n = len as i64;
        let resolved = if idx < 0 { n + 1 + idx } else { idx };
        if resolved < 1 || resolved > n {
            return Err(RuntimeError::IndexOutOfRange(format!(
                "{axis} index {idx} outside 1..={n}"
            ))
            .into());
        }
        Ok((resolved - 1) as usize)
    }

    pub fn index(&self, i: i64, j: i64) -> Result<&Cell, Error> {
        let row = Self::normalize(i, self.row_count(), "row")?;
        let col = Self::normalize(j, self.col_count(), "column")?;
        Ok(&self.rows[row][col])
    }

    /// Single-index access: the sole cell of a row, for column matrices.
    pub fn index_row(&self, i: i64) -> Result<&Cell, Error> {
        if self.col_count() != 1 {
            return Err(RuntimeError::type_mismatch(format!(
                "single-index access needs a single-column matrix, this one has {} columns",
                self.col_count()
            )));
        }
        let row = Self::normalize(i, self.row_count(), "row")?;
        Ok(&self.rows[row][0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qcell(v: f64) -> Cell {
        Cell::Quantity(Quantity::dimensionless(v))
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = Matrix::new(vec![vec![qcell(1.0), qcell(2.0)], vec![qcell(3.0)]]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RuntimeError>(),
            Some(RuntimeError::RaggedMatrix { row: 2, got: 1, expected: 2 })
        ));
    }

    #[test]
    fn negative_row_index_counts_from_end() {
        let m = Matrix::column(vec![qcell(1.0), qcell(2.0), qcell(3.0)]);
        assert_eq!(m.index_row(-1).unwrap(), m.index_row(3).unwrap());
        assert_eq!(m.index_row(-3).unwrap(), m.index_row(1).unwrap());
    }

    #[test]
    fn out_of_range_after_normalization() {
        let m = Matrix::column(vec![qcell(1.0), qcell(2.0)]);
        for bad in [0, 3, -3] {
            let err = m.index_row(bad).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<RuntimeError>(),
                Some(RuntimeError::IndexOutOfRange(_))
            ));
        }
    }

    #[test]
    fn two_dimensional_indexing() {
        let m = Matrix::new(vec![
            vec![qcell(1.0), qcell(2.0)],
            vec![qcell(3.0), qcell(4.0)],
        ])
        .unwrap();
        assert_eq!(m.index(2, 1).unwrap(), &qcell(3.0));
        assert_eq!(m.index(-1, -1).unwrap(), &qcell(4.0));
    }

    #[test]
    fn single_index_needs_column_shape() {
        let m = Matrix::new(vec![vec![qcell(1.0), qcell(2.0)]]).unwrap();
        let err = m.index_row(1).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RuntimeError>(),
            Some(RuntimeError::TypeMismatch(_))
        ));
    }

    #[test]
    fn heterogeneous_cells() {
        let m = Matrix::column(vec![
            qcell(1.0),
            Cell::Text("label".into()),
            Cell::Nested(Matrix::column(vec![qcell(2.0)])),
        ]);
        assert!(matches!(m.index_row(2).unwrap(), Cell::Text(t) if t == "label"));
        assert!(matches!(m.index_row(3).unwrap(), Cell::Nested(_)));
    }
}
