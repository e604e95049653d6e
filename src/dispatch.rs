//! Capability-based selection of a scoring backend.
//!
//! A [`Dispatcher`] is built from an explicit [`CapabilityReport`] and resolves the
//! kernel table for every backend once, up front. The [`Policy`] only decides how
//! a call finds its entry in that table:
//!
//! | Policy | Selection |
//! |--------|-----------|
//! | [`Policy::Optimistic`] | Tests `avx512`, then `avx2`, then `avx`, else baseline |
//! | [`Policy::Pessimistic`] | Tests baseline-only, AVX-only, AVX2-only, else the widest |
//! | [`Policy::JumpTable`] | One `match` arm per dense capability ordinal |
//! | [`Policy::Indirect`] | A boxed [`ScoreKernel`] chosen once and called through |
//!
//! All four pick the same backend for the same report. The free functions
//! [`dot_product`], [`multi_dot_product`] and [`packed_multi_dot_product`] go
//! through a process-wide dispatcher built on first use from
//! [`process_capability_report`] and the policy selected at build time (cargo
//! features `dispatch-optimistic`, `dispatch-pessimistic`, `dispatch-indirect`;
//! jump table otherwise).
//!
//! Baseline hosts get the 4-lane portable kernels.

use std::fmt;
use std::sync::OnceLock;

use crate::backend::{Backend, KernelSet, ScoreKernel};
use crate::capability::{CapabilityLevel, CapabilityReport, process_capability_report};
use crate::quant::QuantParams;

/// How a call is routed to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Policy {
    Optimistic,
    Pessimistic,
    JumpTable,
    Indirect,
}

impl Policy {
    pub const ALL: [Policy; 4] = [
        Policy::Optimistic,
        Policy::Pessimistic,
        Policy::JumpTable,
        Policy::Indirect,
    ];

    /// Policy selected by cargo features.
    pub const BUILD: Policy = if cfg!(feature = "dispatch-optimistic") {
        Policy::Optimistic
    } else if cfg!(feature = "dispatch-pessimistic") {
        Policy::Pessimistic
    } else if cfg!(feature = "dispatch-indirect") {
        Policy::Indirect
    } else {
        Policy::JumpTable
    };

    pub const fn name(self) -> &'static str {
        match self {
            Policy::Optimistic => "optimistic",
            Policy::Pessimistic => "pessimistic",
            Policy::JumpTable => "jump-table",
            Policy::Indirect => "indirect",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Highest flag first. Expects a normalized report.
pub fn select_optimistic(report: CapabilityReport) -> Backend {
    if report.avx512 {
        Backend::Avx512
    } else if report.avx2 {
        Backend::Avx2
    } else if report.avx {
        Backend::Avx
    } else {
        Backend::Sse
    }
}

/// Lowest level first.
pub fn select_pessimistic(report: CapabilityReport) -> Backend {
    if report.baseline_only() {
        Backend::Sse
    } else if report.avx_only() {
        Backend::Avx
    } else if report.avx2_only() {
        Backend::Avx2
    } else {
        Backend::Avx512
    }
}

pub fn select_jump(level: CapabilityLevel) -> Backend {
    match level.ordinal() {
        0 => Backend::Sse,
        1 => Backend::Avx,
        2 => Backend::Avx2,
        _ => Backend::Avx512,
    }
}

/// Routes scoring calls to the kernels of one capability report.
///
/// The branch policies call the resolved [`KernelSet`] directly. Only
/// [`Policy::Indirect`] holds a boxed kernel and pays a virtual call.
#[derive(Debug)]
pub struct Dispatcher {
    policy: Policy,
    report: CapabilityReport,
    table: [KernelSet; 5],
    indirect: Option<Box<dyn ScoreKernel>>,
}

impl Dispatcher {
    /// Resolves every backend's kernels for `report`.
    ///
    /// The report is normalized first, so a flag without its lower levels is
    /// ignored by every policy alike.
    pub fn new(policy: Policy, report: CapabilityReport) -> Self {
        let report = report.normalized();
        let table = Backend::ALL.map(KernelSet::resolve);
        let backend = select_jump(report.level());
        let indirect = match policy {
            Policy::Indirect => {
                let kernel: Box<dyn ScoreKernel> = Box::new(table[backend.index()]);
                Some(kernel)
            }
            _ => None,
        };

        tracing::debug!(
            policy = %policy,
            level = %report.level(),
            backend = %backend,
            native = table[backend.index()].is_native(),
            "dispatcher built"
        );

        Self {
            policy,
            report,
            table,
            indirect,
        }
    }

    pub fn with_level(policy: Policy, level: CapabilityLevel) -> Self {
        Self::new(policy, CapabilityReport::for_level(level))
    }

    /// Dispatcher for this process: build-time policy, detected (and capped) level.
    pub fn for_process() -> Self {
        Self::new(Policy::BUILD, process_capability_report())
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn report(&self) -> CapabilityReport {
        self.report
    }

    pub fn level(&self) -> CapabilityLevel {
        self.report.level()
    }

    /// Whether calls go through a boxed kernel.
    pub fn is_indirect(&self) -> bool {
        self.indirect.is_some()
    }

    /// Backend that calls are routed to.
    pub fn selected_backend(&self) -> Backend {
        match &self.indirect {
            Some(kernel) => kernel.backend(),
            None => self.route().backend(),
        }
    }

    /// Kernels resolved for `backend`, whatever the policy would pick.
    pub fn kernels(&self, backend: Backend) -> &KernelSet {
        &self.table[backend.index()]
    }

    #[inline]
    pub fn dot(&self, a: &[f32], b: &[f32]) -> f32 {
        match &self.indirect {
            Some(kernel) => kernel.dot(a, b),
            None => (self.route().dot_fn())(a, b),
        }
    }

    #[inline]
    pub fn multi_dot(&self, query: &[f32], matrix: &[f32], dim: usize, ids: &[u32], out: &mut [f32]) {
        match &self.indirect {
            Some(kernel) => kernel.multi_dot(query, matrix, dim, ids, out),
            None => (self.route().multi_dot_fn())(query, matrix, dim, ids, out),
        }
    }

    #[inline]
    pub fn packed_multi_dot(
        &self,
        query: &[f32],
        packed: &[u8],
        dim: usize,
        ids: &[u32],
        params: QuantParams,
        out: &mut [f32],
    ) {
        match &self.indirect {
            Some(kernel) => kernel.packed_multi_dot(query, packed, dim, ids, params, out),
            None => (self.route().packed_multi_dot_fn())(query, packed, dim, ids, params, out),
        }
    }

    #[inline]
    fn route(&self) -> &KernelSet {
        let backend = match self.policy {
            Policy::Optimistic => select_optimistic(self.report),
            Policy::Pessimistic => select_pessimistic(self.report),
            Policy::JumpTable | Policy::Indirect => select_jump(self.report.level()),
        };
        &self.table[backend.index()]
    }
}

impl ScoreKernel for Dispatcher {
    fn backend(&self) -> Backend {
        self.selected_backend()
    }

    #[inline]
    fn dot(&self, a: &[f32], b: &[f32]) -> f32 {
        Dispatcher::dot(self, a, b)
    }

    #[inline]
    fn multi_dot(&self, query: &[f32], matrix: &[f32], dim: usize, ids: &[u32], out: &mut [f32]) {
        Dispatcher::multi_dot(self, query, matrix, dim, ids, out)
    }

    #[inline]
    fn packed_multi_dot(
        &self,
        query: &[f32],
        packed: &[u8],
        dim: usize,
        ids: &[u32],
        params: QuantParams,
        out: &mut [f32],
    ) {
        Dispatcher::packed_multi_dot(self, query, packed, dim, ids, params, out)
    }
}

/// The process-wide dispatcher, built on first use.
pub fn process_dispatcher() -> &'static Dispatcher {
    static DISPATCHER: OnceLock<Dispatcher> = OnceLock::new();
    DISPATCHER.get_or_init(|| {
        let dispatcher = Dispatcher::for_process();
        tracing::info!(
            policy = %dispatcher.policy(),
            level = %dispatcher.level(),
            backend = %dispatcher.selected_backend(),
            "score kernel initialized"
        );
        dispatcher
    })
}

/// Dot product of `query` and `candidate` on the best available backend.
pub fn dot_product(query: &[f32], candidate: &[f32]) -> f32 {
    process_dispatcher().dot(query, candidate)
}

/// Scores `query` against the rows `ids` of `matrix`, writing `out[e]` for `ids[e]`.
///
/// `query.len() == dim`, `out.len() == ids.len()` and every id addressing a row
/// are preconditions. An out-of-range id panics. Use
/// [`checked_multi_dot_product`](crate::checked_multi_dot_product) to get an
/// error instead.
pub fn multi_dot_product(query: &[f32], matrix: &[f32], dim: usize, ids: &[u32], out: &mut [f32]) {
    process_dispatcher().multi_dot(query, matrix, dim, ids, out);
}

/// Like [`multi_dot_product`] over u8 rows decoded with `params`.
pub fn packed_multi_dot_product(
    query: &[f32],
    packed: &[u8],
    dim: usize,
    ids: &[u32],
    params: QuantParams,
    out: &mut [f32],
) {
    process_dispatcher().packed_multi_dot(query, packed, dim, ids, params, out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dot::dot_naive;
    use proptest::prelude::*;

    fn all_reports() -> Vec<CapabilityReport> {
        let mut reports = Vec::new();
        for bits in 0u8..8 {
            reports.push(CapabilityReport {
                avx: bits & 1 != 0,
                avx2: bits & 2 != 0,
                avx512: bits & 4 != 0,
            });
        }
        reports
    }

    #[test]
    fn policies_agree_for_every_report() {
        for report in all_reports() {
            let backends: Vec<Backend> = Policy::ALL
                .iter()
                .map(|&policy| Dispatcher::new(policy, report).selected_backend())
                .collect();
            assert!(
                backends.iter().all(|&b| b == backends[0]),
                "{report:?}: {backends:?}"
            );
            assert_eq!(backends[0], select_jump(report.level()));
        }
    }

    #[test]
    fn selection_functions_agree_on_normalized_reports() {
        for level in CapabilityLevel::ALL {
            let report = CapabilityReport::for_level(level);
            let jump = select_jump(level);
            assert_eq!(select_optimistic(report), jump);
            assert_eq!(select_pessimistic(report), jump);
            assert_eq!(jump.index(), level.ordinal() + 1);
        }
    }

    #[test]
    fn only_indirect_policy_boxes_its_kernel() {
        for level in CapabilityLevel::ALL {
            for policy in Policy::ALL {
                let dispatcher = Dispatcher::with_level(policy, level);
                assert_eq!(dispatcher.is_indirect(), policy == Policy::Indirect, "{policy} {level}");
                let routed = dispatcher.kernels(dispatcher.selected_backend());
                assert_eq!(routed.backend(), select_jump(level));
            }
        }
    }

    #[test]
    fn default_build_uses_jump_table() {
        if !cfg!(any(
            feature = "dispatch-optimistic",
            feature = "dispatch-pessimistic",
            feature = "dispatch-indirect"
        )) {
            assert_eq!(Policy::BUILD, Policy::JumpTable);
        }
    }

    proptest! {
        #[test]
        fn synthetic_levels_score_like_reference(
            level in 0usize..4,
            policy in 0usize..4,
            dim in 1usize..70,
            seed in any::<u32>(),
        ) {
            let level = CapabilityLevel::from_ordinal(level).unwrap();
            let dispatcher = Dispatcher::with_level(Policy::ALL[policy], level);

            let rows = 9usize;
            let matrix: Vec<f32> = (0..dim * rows)
                .map(|i| ((i as u32).wrapping_mul(2_654_435_761) ^ seed) as f32 / u32::MAX as f32 - 0.5)
                .collect();
            let packed: Vec<u8> = (0..dim * rows).map(|i| (i as u32 ^ seed) as u8).collect();
            let query: Vec<f32> = matrix[..dim].iter().map(|x| x * 2.0).collect();
            let ids: Vec<u32> = (0..7).map(|e| (seed.wrapping_add(e * 5)) % rows as u32).collect();
            let params = QuantParams::new(0.25, 1.0 / 64.0);

            let mut out = vec![0.0f32; ids.len()];
            dispatcher.multi_dot(&query, &matrix, dim, &ids, &mut out);
            for (&id, &got) in ids.iter().zip(&out) {
                let start = id as usize * dim;
                let want = dot_naive(&query, &matrix[start..start + dim]);
                prop_assert!((got - want).abs() <= 1e-4 * (1.0 + want.abs()));
            }

            dispatcher.packed_multi_dot(&query, &packed, dim, &ids, params, &mut out);
            for (&id, &got) in ids.iter().zip(&out) {
                let start = id as usize * dim;
                let want: f32 = query
                    .iter()
                    .zip(&packed[start..start + dim])
                    .map(|(&q, &b)| q * params.dequantize(b))
                    .sum();
                prop_assert!((got - want).abs() <= 1e-3 * (1.0 + want.abs()));
            }

            let single = dispatcher.dot(&query, &matrix[..dim]);
            let want = dot_naive(&query, &matrix[..dim]);
            prop_assert!((single - want).abs() <= 1e-4 * (1.0 + want.abs()));
        }
    }

    #[test]
    fn process_entry_points_match_reference() {
        let dim = 64;
        let query = vec![0.5f32; dim];
        let matrix = vec![1.0f32; dim * 3];
        assert_eq!(dot_product(&query, &matrix[..dim]), 32.0);

        let mut out = [0.0f32; 5];
        multi_dot_product(&query, &matrix, dim, &[0, 1, 2, 1, 0], &mut out);
        assert_eq!(out, [32.0; 5]);

        let packed = vec![255u8; dim * 3];
        packed_multi_dot_product(&query, &packed, dim, &[2, 2], QuantParams::IDENTITY, &mut out[..2]);
        assert_eq!(&out[..2], &[8160.0, 8160.0]);

        assert!(process_dispatcher().selected_backend() >= Backend::Sse);
        assert_eq!(process_dispatcher().is_indirect(), Policy::BUILD == Policy::Indirect);
    }
}
