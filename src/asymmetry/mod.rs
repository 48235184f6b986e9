//! # Asymmetry
//!
//! From raw counter histograms to the decay-corrected asymmetry and its
//! statistical error, for a single run, a suite of runs, several detector
//! groups, or both.
//!
//! ```rust
//! use mufit_rs::asymmetry::{AsymmetryEngine, DetectorGroup, RunHistograms, RunIdentity};
//! use ndarray::array;
//!
//! let identity = RunIdentity::new(1, 2, 3, 10.0);
//! let counts = array![[1000, 900, 800], [1000, 900, 800]];
//! let run = RunHistograms::new(identity, counts, &[0.0, 0.0]).unwrap();
//! let group = DetectorGroup::parse("1", "2", 1.0).unwrap();
//!
//! let result = AsymmetryEngine::new(0).single(&run, &group).unwrap();
//! assert!(result.asymmetry.iter().all(|a| a.abs() < 1e-12));
//! ```

pub mod engine;
pub mod grouping;
pub mod histogram;

pub use engine::{AsymmetryEngine, AsymmetryResult, BackgroundWindow};
pub use grouping::{parse_counter_list, DetectorGroup};
pub use histogram::{HistogramSource, MemorySource, RunHistograms, RunIdentity};
