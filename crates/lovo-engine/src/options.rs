use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for a LOVO run. All defaults are explicit values captured
/// at construction; nothing is read from process-wide state afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Frames to pass over before accumulating. Rounded down to whole
    /// batches of `cpus` frames; see the batch-keep rule in the pass module.
    pub begin: usize,
    /// Frames to pass over between accumulated stretches, with the same
    /// whole-batch rounding as `begin`.
    pub skip: usize,
    /// Worker count; also the batch size of the concurrent decode.
    pub cpus: usize,
    /// Atom names eligible as alignment anchors.
    pub atom_names: Vec<String>,
    /// Chains eligible as alignment anchors. Empty accepts every chain.
    pub chains: Vec<String>,
    /// Explicit rigid-subset size. Ignored while `less_than_rmsd` is set,
    /// matching the precedence of the threshold criterion.
    pub n_most_rigid: Option<usize>,
    /// Threshold mode: select every candidate whose per-atom RMSD (the
    /// square root of the averaged squared deviation, in Angstrom) falls
    /// below this value, growing the cutoff by 10% steps until at least
    /// `minimum_n` candidates qualify.
    pub less_than_rmsd: Option<f64>,
    /// Floor for the threshold mode's subset size.
    pub minimum_n: usize,
    /// When set, the aligned trajectory is streamed to this DCD path once
    /// the selection first narrows.
    pub write_traj: Option<PathBuf>,
    /// Hard ceiling on narrowing iterations; exceeding it reports a
    /// distinct did-not-converge error instead of looping forever.
    pub max_iterations: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            begin: 0,
            skip: 0,
            cpus: default_cpus(),
            atom_names: vec!["CA".to_string()],
            chains: Vec::new(),
            n_most_rigid: None,
            less_than_rmsd: Some(1.0),
            minimum_n: 10,
            write_traj: None,
            max_iterations: 100,
        }
    }
}

impl Options {
    /// Defaults for coarse-grained (Martini) trajectories: backbone beads,
    /// and a large stride since those trajectories run long.
    pub fn default_cg() -> Self {
        Self {
            atom_names: vec!["BB".to_string()],
            skip: 1000,
            ..Self::default()
        }
    }

    /// Set the rigid-subset size to `perc` percent of a `seqlen`-residue
    /// sequence, switching off the threshold criterion.
    pub fn set_rigid_percent(&mut self, perc: usize, seqlen: usize) {
        let n = (perc as f64 / 100.0 * seqlen as f64) as usize;
        self.n_most_rigid = Some(n.max(1));
        self.less_than_rmsd = None;
    }
}

fn default_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_atomistic() {
        let opts = Options::default();
        assert_eq!(opts.atom_names, vec!["CA"]);
        assert_eq!(opts.less_than_rmsd, Some(1.0));
        assert_eq!(opts.minimum_n, 10);
        assert!(opts.cpus >= 1);
    }

    #[test]
    fn cg_defaults_use_backbone_beads() {
        let opts = Options::default_cg();
        assert_eq!(opts.atom_names, vec!["BB"]);
        assert_eq!(opts.skip, 1000);
    }

    #[test]
    fn rigid_percent_overrides_threshold() {
        let mut opts = Options::default();
        opts.set_rigid_percent(10, 250);
        assert_eq!(opts.n_most_rigid, Some(25));
        assert_eq!(opts.less_than_rmsd, None);
    }
}
