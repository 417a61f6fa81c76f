//! LQR problem definition.
//!
//! ```text
//! minimize    sum_k 0.5 x_k' Q_k x_k + q_k' x_k + 0.5 u_k' R_k u_k + r_k' u_k + c_k
//! subject to  x_{k+1} = A_k x_k + B_k u_k + d_k,   x_0 = x0
//! ```
//!
//! `Q_k` and `R_k` are diagonal. The last knot point has no input and no
//! dynamics; its `R`, `r`, `A`, `B` and `d` are stored but ignored.

use crate::error::{NdlqrError, NdlqrResult};
use nalgebra::{DMatrixView, DVector, DVectorView};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Cost and dynamics data for a single knot point.
///
/// `A` (`n x n`) and `B` (`n x m`) are stored column-major.
#[derive(Debug, Clone, PartialEq)]
#[allow(non_snake_case)] // Q, R, A, B follow the usual LQR notation
pub struct LqrData {
    pub nstates: usize,
    pub ninputs: usize,
    pub Q: Vec<f64>,
    pub R: Vec<f64>,
    pub q: Vec<f64>,
    pub r: Vec<f64>,
    pub c: f64,
    pub A: Vec<f64>,
    pub B: Vec<f64>,
    pub d: Vec<f64>,
}

impl LqrData {
    /// All-zero data of the given shape.
    pub fn zeros(nstates: usize, ninputs: usize) -> Self {
        Self {
            nstates,
            ninputs,
            Q: vec![0.0; nstates],
            R: vec![0.0; ninputs],
            q: vec![0.0; nstates],
            r: vec![0.0; ninputs],
            c: 0.0,
            A: vec![0.0; nstates * nstates],
            B: vec![0.0; nstates * ninputs],
            d: vec![0.0; nstates],
        }
    }

    pub fn a(&self) -> DMatrixView<'_, f64> {
        DMatrixView::from_slice(&self.A, self.nstates, self.nstates)
    }

    pub fn b(&self) -> DMatrixView<'_, f64> {
        DMatrixView::from_slice(&self.B, self.nstates, self.ninputs)
    }

    pub fn validate(&self) -> Result<(), String> {
        let (n, m) = (self.nstates, self.ninputs);
        if n == 0 || m == 0 {
            return Err(format!("nstates={} and ninputs={} must be positive", n, m));
        }
        let checks: [(&str, usize, usize); 8] = [
            ("Q", self.Q.len(), n),
            ("R", self.R.len(), m),
            ("q", self.q.len(), n),
            ("r", self.r.len(), m),
            ("A", self.A.len(), n * n),
            ("B", self.B.len(), n * m),
            ("d", self.d.len(), n),
            ("c", 1, 1),
        ];
        for (name, actual, expected) in checks {
            if actual != expected {
                return Err(format!("{} has length {}, expected {}", name, actual, expected));
            }
        }
        let finite = [&self.Q, &self.R, &self.q, &self.r, &self.A, &self.B, &self.d]
            .iter()
            .all(|v| v.iter().all(|x| x.is_finite()))
            && self.c.is_finite();
        if !finite {
            return Err("data contains non-finite values".to_string());
        }
        Ok(())
    }
}

/// A full LQR problem over `nhorizon` knot points.
#[derive(Debug, Clone, PartialEq)]
pub struct LqrProblem {
    pub nhorizon: usize,
    pub x0: Vec<f64>,
    pub lqrdata: Vec<LqrData>,
}

impl LqrProblem {
    pub fn new(x0: Vec<f64>, lqrdata: Vec<LqrData>) -> NdlqrResult<Self> {
        let prob = Self { nhorizon: lqrdata.len(), x0, lqrdata };
        prob.validate().map_err(NdlqrError::ProblemMismatch)?;
        Ok(prob)
    }

    pub fn nstates(&self) -> usize {
        self.x0.len()
    }

    pub fn ninputs(&self) -> usize {
        self.lqrdata.first().map_or(0, |d| d.ninputs)
    }

    /// Length of the stacked primal-dual vector `[λ, x, u, ..., λ, x]`.
    pub fn nvars(&self) -> usize {
        (2 * self.nstates() + self.ninputs()) * self.nhorizon - self.ninputs()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.nhorizon == 0 {
            return Err("horizon must be positive".to_string());
        }
        if self.lqrdata.len() != self.nhorizon {
            return Err(format!("{} knot points of data for horizon {}", self.lqrdata.len(), self.nhorizon));
        }
        let (n, m) = (self.nstates(), self.ninputs());
        for (k, data) in self.lqrdata.iter().enumerate() {
            if data.nstates != n || data.ninputs != m {
                return Err(format!(
                    "knot {} has shape ({}, {}), expected ({}, {})",
                    k, data.nstates, data.ninputs, n, m
                ));
            }
            data.validate().map_err(|e| format!("knot {}: {}", k, e))?;
        }
        if self.x0.iter().any(|v| !v.is_finite()) {
            return Err("x0 contains non-finite values".to_string());
        }
        Ok(())
    }

    fn check_solution(&self, soln: &[f64]) -> NdlqrResult<()> {
        if soln.len() != self.nvars() {
            return Err(NdlqrError::ProblemMismatch(format!(
                "solution has length {}, expected {}",
                soln.len(),
                self.nvars()
            )));
        }
        Ok(())
    }

    /// Infinity norm of the KKT residual of a stacked solution vector.
    pub fn kkt_residual(&self, soln: &[f64]) -> NdlqrResult<f64> {
        self.check_solution(soln)?;
        let (n, m, nh) = (self.nstates(), self.ninputs(), self.nhorizon);
        let stride = 2 * n + m;
        let lambda = |k: usize| DVectorView::from_slice(&soln[k * stride..k * stride + n], n);
        let x = |k: usize| DVectorView::from_slice(&soln[k * stride + n..k * stride + 2 * n], n);
        let u = |k: usize| DVectorView::from_slice(&soln[k * stride + 2 * n..k * stride + 2 * n + m], m);

        let mut res = 0.0_f64;
        let x0 = DVectorView::from_slice(&self.x0, n);
        res = res.max((x(0) - x0).amax());

        for k in 0..nh {
            let data = &self.lqrdata[k];
            let qx = DVector::from_iterator(n, data.Q.iter().zip(x(k).iter()).map(|(q, x)| q * x));
            let mut grad_x = qx + DVectorView::from_slice(&data.q, n) - lambda(k);
            if k + 1 < nh {
                grad_x += data.a().tr_mul(&lambda(k + 1));

                let ru = DVector::from_iterator(m, data.R.iter().zip(u(k).iter()).map(|(r, u)| r * u));
                let grad_u = ru + DVectorView::from_slice(&data.r, m) + data.b().tr_mul(&lambda(k + 1));
                res = res.max(grad_u.amax());

                let dyn_res = data.a() * x(k) + data.b() * u(k) + DVectorView::from_slice(&data.d, n) - x(k + 1);
                res = res.max(dyn_res.amax());
            }
            res = res.max(grad_x.amax());
        }
        Ok(res)
    }

    /// Value of the quadratic cost at a stacked solution vector.
    pub fn objective(&self, soln: &[f64]) -> NdlqrResult<f64> {
        self.check_solution(soln)?;
        let (n, m, nh) = (self.nstates(), self.ninputs(), self.nhorizon);
        let stride = 2 * n + m;
        let mut cost = 0.0;
        for (k, data) in self.lqrdata.iter().enumerate() {
            let x = &soln[k * stride + n..k * stride + 2 * n];
            cost += data.c;
            for i in 0..n {
                cost += 0.5 * data.Q[i] * x[i] * x[i] + data.q[i] * x[i];
            }
            if k + 1 < nh {
                let u = &soln[k * stride + 2 * n..k * stride + 2 * n + m];
                for i in 0..m {
                    cost += 0.5 * data.R[i] * u[i] * u[i] + data.r[i] * u[i];
                }
            }
        }
        Ok(cost)
    }

    pub fn from_json_str(json: &str) -> NdlqrResult<Self> {
        let record: LqrProblemRecord = serde_json::from_str(json)?;
        record.into_problem()
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> NdlqrResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> NdlqrResult<String> {
        Ok(serde_json::to_string_pretty(&LqrProblemRecord::from(self))?)
    }
}

// On-disk layout: matrices are arrays of columns and every knot point carries
// its own index.

#[derive(Debug, Serialize, Deserialize)]
struct LqrProblemRecord {
    nhorizon: usize,
    x0: Vec<f64>,
    lqrdata: Vec<LqrDataRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
#[allow(non_snake_case)]
struct LqrDataRecord {
    #[serde(default)]
    index: Option<usize>,
    nstates: usize,
    ninputs: usize,
    #[serde(default)]
    c: f64,
    Q: Vec<f64>,
    R: Vec<f64>,
    q: Vec<f64>,
    r: Vec<f64>,
    d: Vec<f64>,
    A: Vec<Vec<f64>>,
    B: Vec<Vec<f64>>,
}

fn flatten_columns(name: &str, columns: Vec<Vec<f64>>, nrows: usize, ncols: usize) -> NdlqrResult<Vec<f64>> {
    if columns.len() != ncols || columns.iter().any(|col| col.len() != nrows) {
        return Err(NdlqrError::ProblemMismatch(format!(
            "{} must have {} columns of length {}",
            name, ncols, nrows
        )));
    }
    Ok(columns.into_iter().flatten().collect())
}

fn split_columns(data: &[f64], nrows: usize) -> Vec<Vec<f64>> {
    data.chunks(nrows.max(1)).map(|c| c.to_vec()).collect()
}

impl LqrProblemRecord {
    fn into_problem(self) -> NdlqrResult<LqrProblem> {
        let nhorizon = self.nhorizon;
        if self.lqrdata.len() != nhorizon {
            return Err(NdlqrError::ProblemMismatch(format!(
                "expected {} lqrdata entries, found {}",
                nhorizon,
                self.lqrdata.len()
            )));
        }
        let mut slots: Vec<Option<LqrData>> = vec![None; nhorizon];
        for (pos, rec) in self.lqrdata.into_iter().enumerate() {
            let index = rec.index.unwrap_or(pos);
            if index >= nhorizon {
                return Err(NdlqrError::IndexOutOfRange { index, max: nhorizon - 1 });
            }
            let (n, m) = (rec.nstates, rec.ninputs);
            let data = LqrData {
                nstates: n,
                ninputs: m,
                Q: rec.Q,
                R: rec.R,
                q: rec.q,
                r: rec.r,
                c: rec.c,
                A: flatten_columns("A", rec.A, n, n)?,
                B: flatten_columns("B", rec.B, n, m)?,
                d: rec.d,
            };
            if slots[index].replace(data).is_some() {
                log::warn!("duplicate lqrdata entry for index {}; keeping the last one", index);
            }
        }
        let lqrdata = slots
            .into_iter()
            .enumerate()
            .map(|(k, d)| d.ok_or_else(|| NdlqrError::ProblemMismatch(format!("missing lqrdata for index {}", k))))
            .collect::<NdlqrResult<Vec<_>>>()?;
        LqrProblem::new(self.x0, lqrdata)
    }
}

impl From<&LqrProblem> for LqrProblemRecord {
    fn from(prob: &LqrProblem) -> Self {
        let lqrdata = prob
            .lqrdata
            .iter()
            .enumerate()
            .map(|(k, d)| LqrDataRecord {
                index: Some(k),
                nstates: d.nstates,
                ninputs: d.ninputs,
                c: d.c,
                Q: d.Q.clone(),
                R: d.R.clone(),
                q: d.q.clone(),
                r: d.r.clone(),
                d: d.d.clone(),
                A: split_columns(&d.A, d.nstates),
                B: split_columns(&d.B, d.nstates),
            })
            .collect();
        Self { nhorizon: prob.nhorizon, x0: prob.x0.clone(), lqrdata }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn double_integrator(nhorizon: usize) -> LqrProblem {
        let mut data = LqrData::zeros(2, 1);
        data.Q = vec![1.0, 1.0];
        data.R = vec![0.1];
        data.A = vec![1.0, 0.0, 0.1, 1.0];
        data.B = vec![0.005, 0.1];
        LqrProblem::new(vec![1.0, 0.0], vec![data; nhorizon]).unwrap()
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        let mut prob = double_integrator(4);
        assert_eq!(prob.nvars(), 5 * 4 - 1);
        prob.lqrdata[2].B.pop();
        assert!(prob.validate().unwrap_err().contains("knot 2"));
        assert!(LqrProblem::new(vec![1.0], vec![]).is_err());
    }

    #[test]
    fn test_json_columns_and_index() {
        // entries out of order; A given as columns
        let json = r#"{
            "nhorizon": 2,
            "x0": [1.0, 2.0],
            "lqrdata": [
                {"index": 1, "nstates": 2, "ninputs": 1, "c": 0.5,
                 "Q": [10.0, 10.0], "R": [0.1], "q": [0.0, 0.0], "r": [0.0], "d": [0.0, 0.0],
                 "A": [[1.0, 0.0], [0.0, 1.0]], "B": [[0.0, 1.0]]},
                {"index": 0, "nstates": 2, "ninputs": 1,
                 "Q": [1.0, 1.0], "R": [0.1], "q": [0.5, 0.5], "r": [0.0], "d": [0.0, 0.0],
                 "A": [[1.0, 0.0], [0.1, 1.0]], "B": [[0.005, 0.1]]}
            ]
        }"#;
        let prob = LqrProblem::from_json_str(json).unwrap();
        assert_eq!(prob.lqrdata[0].A, vec![1.0, 0.0, 0.1, 1.0]);
        assert_eq!(prob.lqrdata[1].Q, vec![10.0, 10.0]);
        assert_eq!(prob.lqrdata[1].c, 0.5);
        assert_eq!(prob.lqrdata[0].c, 0.0);

        let text = prob.to_json_string().unwrap();
        assert_eq!(LqrProblem::from_json_str(&text).unwrap(), prob);
    }

    #[test]
    fn test_json_bad_matrix() {
        let json = r#"{"nhorizon": 1, "x0": [0.0],
            "lqrdata": [{"nstates": 1, "ninputs": 1, "Q": [1.0], "R": [1.0], "q": [0.0],
                         "r": [0.0], "d": [0.0], "A": [[1.0, 2.0]], "B": [[1.0]]}]}"#;
        assert!(matches!(LqrProblem::from_json_str(json), Err(NdlqrError::ProblemMismatch(_))));
        assert!(matches!(LqrProblem::from_json_str("{"), Err(NdlqrError::Json(_))));
    }

    #[test]
    fn test_residual_of_feasible_rollout() {
        // zero inputs, zero cost gradients: the dynamics rows vanish on a rollout
        let prob = double_integrator(2);
        let mut soln = vec![0.0; prob.nvars()];
        soln[2..4].copy_from_slice(&[1.0, 0.0]); // x_0
        soln[7..9].copy_from_slice(&[1.0, 0.0]); // x_1 = A x_0
        // λ_1 = Q x_1, λ_0 = Q x_0 + A' λ_1
        soln[5..7].copy_from_slice(&[1.0, 0.0]);
        soln[0..2].copy_from_slice(&[2.0, 0.1]);
        // u row: R u + B' λ_1 = 0.005 ≠ 0
        let res = prob.kkt_residual(&soln).unwrap();
        assert!((res - 0.005).abs() < 1e-12, "residual {}", res);
        let cost = prob.objective(&soln).unwrap();
        assert!((cost - 1.0).abs() < 1e-12, "cost {}", cost);
    }
}
