use faer::diag::DiagRef;
use faer::linalg::solvers::{self, Llt as FaerLlt, Solve};
use faer::{MatMut, MatRef, Side};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use std::marker::PhantomData;
use thiserror::Error;

const SYMMETRY_REL_TOL: f64 = 1e-12;
const SYMMETRY_ABS_TOL: f64 = 1e-12;
/// Smallest eigenvalue must clear this fraction of the spectral scale for
/// a matrix to count as positive definite on the eigenvalue fallback path.
const EIGEN_PD_REL_TOL: f64 = 1e-10;

#[derive(Debug, Error)]
pub enum LinalgError {
    #[error("matrix must be square, got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },

    #[error("matrix is not symmetric within tolerance")]
    NotSymmetric,

    #[error("matrix has no entries")]
    Empty,

    #[error("self-adjoint eigendecomposition failed: {0:?}")]
    Eigen(solvers::EvdError),

    #[error("Cholesky factorization failed: {0:?}")]
    Cholesky(solvers::LltError),
}

/// Borrowed faer view over an ndarray matrix.
///
/// Layouts faer cannot traverse safely (non-positive strides) are
/// materialized into a compact owned copy.
struct FaerView<'a> {
    ptr: *const f64,
    rows: usize,
    cols: usize,
    row_stride: isize,
    col_stride: isize,
    owned: Option<Array2<f64>>,
    _marker: PhantomData<&'a f64>,
}

impl<'a> FaerView<'a> {
    fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let (rows, cols) = array.dim();
        let strides = array.strides();
        if strides[0] <= 0 || strides[1] <= 0 {
            let owned = array.to_owned();
            let owned_strides = owned.strides();
            return Self {
                ptr: owned.as_ptr(),
                rows,
                cols,
                row_stride: owned_strides[0],
                col_stride: owned_strides[1],
                owned: Some(owned),
                _marker: PhantomData,
            };
        }
        Self {
            ptr: array.as_ptr(),
            rows,
            cols,
            row_stride: strides[0],
            col_stride: strides[1],
            owned: None,
            _marker: PhantomData,
        }
    }

    #[inline]
    fn as_ref(&self) -> MatRef<'_, f64> {
        let (ptr, rows, cols, row_stride, col_stride) = if let Some(owned) = &self.owned {
            let strides = owned.strides();
            (
                owned.as_ptr(),
                owned.nrows(),
                owned.ncols(),
                strides[0],
                strides[1],
            )
        } else {
            (self.ptr, self.rows, self.cols, self.row_stride, self.col_stride)
        };
        // SAFETY: pointer and strides come straight from a live ndarray
        // borrow (or the owned copy held by self) with positive strides.
        unsafe { MatRef::from_raw_parts(ptr, rows, cols, row_stride, col_stride) }
    }
}

#[inline]
fn array1_to_col_mat_mut(array: &mut Array1<f64>) -> MatMut<'_, f64> {
    let len = array.len();
    let stride = array.strides()[0];
    // SAFETY: one column backed by the ndarray borrow; the column stride
    // is irrelevant for a single column.
    unsafe { MatMut::from_raw_parts_mut(array.as_mut_ptr(), len, 1, stride, 0) }
}

#[inline]
fn array2_to_mat_mut(array: &mut Array2<f64>) -> MatMut<'_, f64> {
    let (rows, cols) = array.dim();
    let strides = array.strides();
    let s0 = strides[0];
    let s1 = strides[1];
    // SAFETY: dimensions and strides are exactly those reported by the
    // mutably borrowed ndarray.
    unsafe { MatMut::from_raw_parts_mut(array.as_mut_ptr(), rows, cols, s0, s1) }
}

fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((mat.nrows(), mat.ncols()));
    for j in 0..mat.ncols() {
        for i in 0..mat.nrows() {
            out[[i, j]] = mat[(i, j)];
        }
    }
    out
}

fn diag_to_array(diag: DiagRef<'_, f64>) -> Array1<f64> {
    let mat = diag.column_vector().as_mat();
    let mut out = Array1::<f64>::zeros(mat.nrows());
    for i in 0..mat.nrows() {
        out[i] = mat[(i, 0)];
    }
    out
}

fn is_symmetric_with_tolerance<S: Data<Elem = f64>>(matrix: &ArrayBase<S, Ix2>) -> bool {
    let (nrows, ncols) = matrix.dim();
    if nrows != ncols {
        return false;
    }
    let mut scale = 0.0f64;
    for i in 0..nrows {
        for j in 0..ncols {
            scale = scale.max(matrix[[i, j]].abs());
        }
    }
    let tol = SYMMETRY_ABS_TOL + SYMMETRY_REL_TOL * scale.max(1.0);
    for i in 0..nrows {
        for j in i + 1..ncols {
            if (matrix[[i, j]] - matrix[[j, i]]).abs() > tol {
                return false;
            }
        }
    }
    true
}

fn checked_square<S: Data<Elem = f64>>(matrix: &ArrayBase<S, Ix2>) -> Result<usize, LinalgError> {
    let (rows, cols) = matrix.dim();
    if rows != cols {
        return Err(LinalgError::NotSquare { rows, cols });
    }
    if !is_symmetric_with_tolerance(matrix) {
        return Err(LinalgError::NotSymmetric);
    }
    Ok(rows)
}

fn eigenvalues(matrix: MatRef<'_, f64>) -> Result<Array1<f64>, LinalgError> {
    let eigen = matrix
        .self_adjoint_eigen(Side::Lower)
        .map_err(LinalgError::Eigen)?;
    Ok(diag_to_array(eigen.S()))
}

/// Whether a symmetric covariance matrix is positive definite.
///
/// Fast path is an LLT attempt; when that fails the spectrum decides, so
/// a barely-semidefinite Gram matrix (e.g. a low-rank `X Xᵀ`) is told
/// apart from an indefinite one instead of being lumped in with LLT
/// round-off failures.
pub fn is_positive_definite<S: Data<Elem = f64>>(
    matrix: &ArrayBase<S, Ix2>,
) -> Result<bool, LinalgError> {
    let n = checked_square(matrix)?;
    if n == 0 {
        return Ok(true);
    }
    let view = FaerView::new(matrix);
    if view.as_ref().llt(Side::Lower).is_ok() {
        return Ok(true);
    }
    log::debug!("LLT rejected the matrix; deciding definiteness from the spectrum");
    let eigs = eigenvalues(view.as_ref())?;
    let min = eigs.iter().copied().fold(f64::INFINITY, f64::min);
    let scale = eigs.iter().copied().map(f64::abs).fold(0.0, f64::max).max(1.0);
    Ok(min > scale * EIGEN_PD_REL_TOL)
}

/// Smallest eigenvalue of a symmetric matrix.
pub fn min_eigenvalue<S: Data<Elem = f64>>(
    matrix: &ArrayBase<S, Ix2>,
) -> Result<f64, LinalgError> {
    let n = checked_square(matrix)?;
    if n == 0 {
        return Err(LinalgError::Empty);
    }
    let view = FaerView::new(matrix);
    let eigs = eigenvalues(view.as_ref())?;
    Ok(eigs.iter().copied().fold(f64::INFINITY, f64::min))
}

/// LLT factorization of a symmetric positive definite covariance matrix,
/// exposing the pieces GP likelihood computations need.
pub struct CovCholesky {
    factor: FaerLlt<f64>,
    dim: usize,
}

impl CovCholesky {
    pub fn new<S: Data<Elem = f64>>(matrix: &ArrayBase<S, Ix2>) -> Result<Self, LinalgError> {
        let dim = checked_square(matrix)?;
        let view = FaerView::new(matrix);
        let factor = view
            .as_ref()
            .llt(Side::Lower)
            .map_err(LinalgError::Cholesky)?;
        Ok(Self { factor, dim })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Solves `K x = rhs` for a single right-hand side.
    pub fn solve_vec(&self, rhs: &Array1<f64>) -> Array1<f64> {
        let mut out = rhs.to_owned();
        let mut view = array1_to_col_mat_mut(&mut out);
        self.factor.solve_in_place(view.as_mut());
        out
    }

    /// Solves `K X = rhs` column-wise.
    pub fn solve_mat(&self, rhs: &Array2<f64>) -> Array2<f64> {
        let mut out = rhs.to_owned();
        let mut view = array2_to_mat_mut(&mut out);
        self.factor.solve_in_place(view.as_mut());
        out
    }

    pub fn lower_triangular(&self) -> Array2<f64> {
        mat_to_array(self.factor.L())
    }

    /// log|K| from the factor diagonal.
    pub fn log_det(&self) -> f64 {
        let l = self.factor.L();
        (0..l.nrows()).map(|i| l[(i, i)].ln()).sum::<f64>() * 2.0
    }
}
