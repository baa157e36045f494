use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use lovo_core::atoms::Atomer;
use lovo_core::error::TrajError;
use lovo_core::frame::Frame;
use lovo_io::{DcdWriter, FormatRegistry};

use crate::error::{LovoError, LovoResult};
use crate::options::Options;
use crate::pass::msd_pass;

/// Outcome of a converged LOVO run.
#[derive(Debug, Clone)]
pub struct LovoReturn {
    /// Size of the rigid subset.
    pub n: usize,
    /// Frames materialized in the final pass.
    pub frames_read: usize,
    /// Indices of the rigid atoms, ascending.
    pub atoms: Vec<usize>,
    /// Residue/molecule ids of the rigid atoms, deduplicated, in atom order.
    pub mol_ids: Vec<i32>,
    /// Mean squared deviation for every candidate atom (not only the rigid
    /// ones), ordered by ascending atom index.
    pub msd: Vec<f64>,
    /// Narrowing iterations needed for convergence.
    pub iterations: usize,
}

impl LovoReturn {
    /// A PyMOL selection command covering the rigid residues.
    pub fn pymol_sel(&self) -> String {
        let mut sel = String::from("select rigid,");
        for (i, id) in self.mol_ids.iter().enumerate() {
            sel.push_str(&format!(" resi {id} "));
            if i < self.mol_ids.len() - 1 {
                sel.push_str("or");
            }
        }
        sel
    }
}

impl fmt::Display for LovoReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "N: {}, atoms: {:?}, residues: {:?}, MSD: {:?}, frames read: {}, iterations needed: {}",
            self.n, self.atoms, self.mol_ids, self.msd, self.frames_read, self.iterations
        )
    }
}

/// Find the most rigid alignment subset of `atoms` over the trajectory at
/// `traj_path`, by iterative narrowing.
///
/// Each iteration runs one full accumulation pass with the current anchor
/// subset (all candidates on the first pass), ranks the candidates by
/// ascending MSD, and keeps the best N; the loop ends when consecutive
/// top-N sets agree. The trajectory is re-opened through the format
/// registry for every pass since the readers are forward-only. Once the
/// selection first narrows, later passes also stream the fitted frames to
/// `options.write_traj` when set, so the emitted trajectory is aligned on
/// a near-final subset rather than the unconverged full-candidate one.
///
/// Reference: 10.1371/journal.pone.0119264. Please cite it if you use this
/// selection in published work.
pub fn lovo(
    atoms: &dyn Atomer,
    reference: &Frame,
    traj_path: impl AsRef<Path>,
    options: &Options,
) -> LovoResult<LovoReturn> {
    let traj_path = traj_path.as_ref();
    if atoms.len() != reference.n_atoms() {
        return Err(TrajError::Mismatch(format!(
            "topology has {} atoms, reference has {}",
            atoms.len(),
            reference.n_atoms()
        ))
        .into());
    }
    let registry = FormatRegistry::with_defaults();
    let candidates = filter_candidates(atoms, &options.atom_names, &options.chains);
    if candidates.is_empty() {
        return Err(LovoError::Invalid(format!(
            "no atoms match names {:?} and chains {:?}",
            options.atom_names, options.chains
        )));
    }
    let target = target_n(options, candidates.len())?;

    let pool = Arc::new(
        rayon::ThreadPoolBuilder::new()
            .num_threads(options.cpus.max(1))
            .build()
            .map_err(|e| LovoError::Invalid(format!("could not build worker pool: {e}")))?,
    );

    // Ranked candidate order from the previous iteration; the first
    // `subset_len` entries are the current anchors. The first pass anchors
    // on every candidate.
    let mut ranked: Vec<usize> = candidates.clone();
    let mut subset_len = ranked.len();
    let mut writer_armed = false;
    let mut prev_limit = 0.0f64;
    let mut iterations = 0usize;

    loop {
        if iterations >= options.max_iterations {
            return Err(LovoError::NoConvergence { iterations });
        }
        let reader = registry.open(traj_path)?;
        let mut writer = match (&options.write_traj, writer_armed) {
            (Some(path), true) => Some(DcdWriter::create(path, atoms.len())?),
            _ => None,
        };
        let pass = msd_pass(
            reader,
            reference,
            &ranked[..subset_len],
            options,
            &pool,
            writer.as_mut(),
        )?;
        if let Some(w) = writer.take() {
            w.finish()?;
        }
        iterations += 1;

        // Stable sort by ascending MSD; candidates enter in ascending
        // index order, so equal values keep that order and cannot make the
        // selection oscillate.
        let mut scored: Vec<(usize, f64)> =
            candidates.iter().map(|&i| (i, pass.msd[i])).collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));

        let (n, new_limit) = match target {
            TargetN::Fixed(n) => (n, 0.0),
            TargetN::Threshold { start, minimum_n } => {
                let sorted: Vec<f64> = scored.iter().map(|&(_, m)| m).collect();
                mobile_limit(&sorted, start, minimum_n)
            }
        };

        let new_order: Vec<usize> = scored.iter().map(|&(i, _)| i).collect();
        let limit_settled = match target {
            TargetN::Fixed(_) => true,
            TargetN::Threshold { start, .. } => {
                new_limit == start || (new_limit - prev_limit).abs() <= 0.01
            }
        };
        if same_elements(&new_order[..n], &ranked[..n.min(subset_len)]) && limit_settled {
            let mut rigid = new_order[..n].to_vec();
            rigid.sort_unstable();
            let msd_by_id: Vec<f64> = candidates.iter().map(|&i| pass.msd[i]).collect();
            info!(n, iterations, frames_read = pass.frames_read, "selection converged");
            return Ok(LovoReturn {
                n,
                frames_read: pass.frames_read,
                mol_ids: dedup_mol_ids(atoms, &rigid),
                atoms: rigid,
                msd: msd_by_id,
                iterations,
            });
        }

        let disagreement = new_order[..n]
            .iter()
            .filter(|i| !ranked[..n.min(subset_len)].contains(i))
            .count();
        debug!(iteration = iterations, n, disagreement, "narrowing subset");
        if disagreement > 0 {
            writer_armed = true;
        }
        prev_limit = new_limit;
        ranked = new_order;
        subset_len = n;
    }
}

#[derive(Clone, Copy)]
enum TargetN {
    Fixed(usize),
    Threshold { start: f64, minimum_n: usize },
}

fn target_n(options: &Options, n_candidates: usize) -> LovoResult<TargetN> {
    if let Some(limit) = options.less_than_rmsd {
        if limit <= 0.0 {
            return Err(LovoError::Invalid(format!(
                "RMSD threshold must be positive, got {limit}"
            )));
        }
        return Ok(TargetN::Threshold {
            start: limit,
            minimum_n: options.minimum_n.clamp(1, n_candidates),
        });
    }
    let n = match options.n_most_rigid {
        Some(n) => {
            if n == 0 || n > n_candidates {
                return Err(LovoError::Invalid(format!(
                    "requested {n} rigid atoms but only {n_candidates} candidates match the filters"
                )));
            }
            n
        }
        // One candidate in ten, as the method's authors recommend.
        None => (n_candidates / 10).max(1),
    };
    Ok(TargetN::Fixed(n))
}

/// Count the leading entries of the MSD-sorted candidates whose RMSD falls
/// below the cutoff, growing the cutoff by 10% steps until at least
/// `minimum_n` qualify.
fn mobile_limit(sorted_msd: &[f64], start: f64, minimum_n: usize) -> (usize, f64) {
    let mut limit = start;
    loop {
        let n = sorted_msd
            .iter()
            .take_while(|&&m| m.sqrt() < limit)
            .count();
        if n >= minimum_n {
            return (n, limit);
        }
        limit *= 1.1;
    }
}

/// Candidate atom indices in ascending order: name must match one of
/// `names`, and the chain one of `chains` unless that filter is empty.
fn filter_candidates(atoms: &dyn Atomer, names: &[String], chains: &[String]) -> Vec<usize> {
    (0..atoms.len())
        .filter(|&i| {
            names.iter().any(|n| n == atoms.name(i))
                && (chains.is_empty() || chains.iter().any(|c| c == atoms.chain(i)))
        })
        .collect()
}

fn same_elements(a: &[usize], b: &[usize]) -> bool {
    a.len() == b.len() && a.iter().all(|x| b.contains(x))
}

fn dedup_mol_ids(atoms: &dyn Atomer, indices: &[usize]) -> Vec<i32> {
    let mut ids = Vec::with_capacity(indices.len());
    for &i in indices {
        let id = atoms.mol_id(i);
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}
