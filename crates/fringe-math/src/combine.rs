//! Coherent combination of the detector windows into one complex signal per
//! baseline.

use fringe_types::error::{RtdError, RtdResult};
use fringe_types::mapping::MappingTable;
use fringe_types::state::CombinedScan;
use ndarray::Array2;
use num_complex::Complex64;

/// Combine the windows of each baseline.
///
/// The OPD of baseline b is `opd[tel2] - opd[tel1]` taken from the first
/// window mapped to b. When that OPD decreases over the scan, samples are
/// read in reverse so every combined row runs with increasing OPD.
///
/// `sci` holds one row per mapping entry, `opd` one row per telescope.
pub fn combine_baselines(
    sci: &Array2<f64>,
    opd: &Array2<f64>,
    mapping: Option<&MappingTable>,
) -> RtdResult<CombinedScan> {
    let mapping = mapping.ok_or_else(|| {
        RtdError::Configuration("no window mapping, cannot combine data".to_string())
    })?;
    let n_opl = sci.ncols();
    if n_opl < 2 || opd.ncols() != n_opl {
        return Err(RtdError::InvalidInput(format!(
            "need matching scans of at least 2 samples, got sci {:?} and opd {:?}",
            sci.dim(),
            opd.dim()
        )));
    }
    if sci.nrows() < mapping.len() {
        return Err(RtdError::InvalidInput(format!(
            "mapping addresses {} windows but only {} were read",
            mapping.len(),
            sci.nrows()
        )));
    }
    if opd.nrows() < mapping.n_telescopes() {
        return Err(RtdError::InvalidInput(format!(
            "mapping uses {} telescopes but opd has {} rows",
            mapping.n_telescopes(),
            opd.nrows()
        )));
    }

    let n_base = mapping.n_baselines();
    let entries = mapping.entries();
    let mut signal = Array2::<Complex64>::zeros((n_base, n_opl));
    let mut opd_cmb = Array2::<f64>::zeros((n_base, n_opl));

    for b in 0..n_base {
        let windows = mapping.windows_of(b + 1);
        let Some(&first) = windows.first() else {
            continue;
        };
        let lead = &entries[first];
        let dx = &opd.row(lead.tel2 - 1) - &opd.row(lead.tel1 - 1);
        let order: Vec<usize> = if dx[1] > dx[0] {
            (0..n_opl).collect()
        } else {
            (0..n_opl).rev().collect()
        };

        for &w in &windows {
            let e = &entries[w];
            let weight = Complex64::from_polar(e.visibility, e.reference_phase);
            let row = sci.row(w);
            for (k, &src) in order.iter().enumerate() {
                signal[[b, k]] += weight * row[src];
            }
        }
        for (k, &src) in order.iter().enumerate() {
            opd_cmb[[b, k]] = dx[src];
        }
    }

    Ok(CombinedScan {
        signal,
        opd: opd_cmb,
    })
}
