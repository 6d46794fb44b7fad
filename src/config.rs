//! Configuration for the optimizing pipeline.
//!
//! [`CompilerOptions`] selects the passes run by [`crate::compiler::Pipeline`], the limits
//! above which a method is declined, and the target description consumed by the liveness
//! analyzer ([`TargetInfo`]).

/// Register file of the target, as far as liveness needs to know it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    /// Number of general-purpose registers available to the allocator (default: 16).
    pub gp_registers: u8,

    /// Number of floating-point registers available to the allocator (default: 16).
    pub fp_registers: u8,

    /// General-purpose registers clobbered by calls.
    pub caller_saved_gp: Vec<u8>,

    /// Floating-point registers clobbered by calls.
    pub caller_saved_fp: Vec<u8>,
}

impl Default for TargetInfo {
    fn default() -> Self {
        Self {
            gp_registers: 16,
            fp_registers: 16,
            caller_saved_gp: (0..8).collect(),
            caller_saved_fp: (0..8).collect(),
        }
    }
}

impl TargetInfo {
    /// A target without caller-saved registers, so calls create no blocking intervals.
    #[must_use]
    pub fn callee_saved_only() -> Self {
        Self {
            caller_saved_gp: Vec::new(),
            caller_saved_fp: Vec::new(),
            ..Self::default()
        }
    }

    /// Sets the caller-saved register lists.
    ///
    /// # Arguments
    ///
    /// * `gp` - General-purpose registers clobbered by calls.
    /// * `fp` - Floating-point registers clobbered by calls.
    ///
    /// # Returns
    ///
    /// The modified description (builder pattern).
    #[must_use]
    pub fn with_caller_saved(mut self, gp: &[u8], fp: &[u8]) -> Self {
        self.caller_saved_gp = gp.to_vec();
        self.caller_saved_fp = fp.to_vec();
        self
    }
}

/// Configuration for the optimizing pipeline.
///
/// Controls pass selection, the size limits checked before compilation starts, loop
/// transformation parameters and the target register file.
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Enable branch elimination on constant conditions (default: true).
    pub enable_branch_elimination: bool,

    /// Enable dead-code and empty-block cleanup (default: true).
    pub enable_cleanup: bool,

    /// Enable sinking constants out of the start block (default: true).
    pub enable_move_constants: bool,

    /// Enable try/catch resolving (default: true).
    pub enable_try_catch_resolving: bool,

    /// Enable loop unrolling (default: false).
    pub enable_loop_unroll: bool,

    /// Enable loop header peeling (default: false).
    pub enable_loop_peeling: bool,

    /// Enable safepoint insertion in loop headers (default: true).
    pub enable_safepoint_insertion: bool,

    /// Let the hotter successor fall through when linearizing (default: false).
    pub enable_freq_branch_reorder: bool,

    /// Linearize in guest pc order, as the bytecode optimizer does (default: false).
    pub bytecode_preserving: bool,

    /// Largest method, in bytes of guest bytecode, that is compiled (default: 30000).
    pub max_bytecode_size: usize,

    /// Largest virtual register count that is compiled (default: 32000).
    pub max_vreg_count: usize,

    /// Largest number of try regions that is compiled (default: 64).
    pub max_try_blocks: usize,

    /// Number of body copies produced by loop unrolling (default: 4).
    pub unroll_factor: usize,

    /// Largest loop body, in instructions, considered for unrolling (default: 100).
    pub unroll_inst_limit: usize,

    /// Run the graph checker after every pass (default: false).
    pub verify_after_each_pass: bool,

    /// Target register description used by liveness.
    pub target: TargetInfo,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            enable_branch_elimination: true,
            enable_cleanup: true,
            enable_move_constants: true,
            enable_try_catch_resolving: true,
            enable_loop_unroll: false,
            enable_loop_peeling: false,
            enable_safepoint_insertion: true,
            enable_freq_branch_reorder: false,
            bytecode_preserving: false,
            max_bytecode_size: 30_000,
            max_vreg_count: 32_000,
            max_try_blocks: 64,
            unroll_factor: 4,
            unroll_inst_limit: 100,
            verify_after_each_pass: false,
            target: TargetInfo::default(),
        }
    }
}

impl CompilerOptions {
    /// Creates a new configuration with default settings.
    ///
    /// # Returns
    ///
    /// A new `CompilerOptions` with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a "fast" configuration that skips every optional rewrite.
    ///
    /// Only cleanup and branch elimination run; loops are left as they are.
    ///
    /// # Returns
    ///
    /// A new `CompilerOptions` optimized for compile time.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            enable_move_constants: false,
            enable_try_catch_resolving: false,
            enable_loop_unroll: false,
            enable_loop_peeling: false,
            ..Self::default()
        }
    }

    /// Creates an "aggressive" configuration with every pass enabled.
    ///
    /// This configuration uses:
    /// - Loop unrolling and header peeling
    /// - Frequency-based branch reordering
    /// - Larger unroll limits
    ///
    /// # Returns
    ///
    /// A new `CompilerOptions` optimized for code quality over compile time.
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            enable_loop_unroll: true,
            enable_loop_peeling: true,
            enable_freq_branch_reorder: true,
            unroll_inst_limit: 400,
            ..Self::default()
        }
    }

    /// Creates a configuration with every pass disabled.
    ///
    /// The pipeline still checks limits and computes liveness.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enable_branch_elimination: false,
            enable_cleanup: false,
            enable_move_constants: false,
            enable_try_catch_resolving: false,
            enable_loop_unroll: false,
            enable_loop_peeling: false,
            enable_safepoint_insertion: false,
            ..Self::default()
        }
    }

    /// Returns `true` if any rewrite pass is enabled.
    #[must_use]
    pub fn any_pass_enabled(&self) -> bool {
        self.enable_branch_elimination
            || self.enable_cleanup
            || self.enable_move_constants
            || self.enable_try_catch_resolving
            || self.enable_loop_unroll
            || self.enable_loop_peeling
            || self.enable_safepoint_insertion
    }

    /// Sets the limits above which a method is declined.
    ///
    /// # Arguments
    ///
    /// * `bytecode_size` - Largest guest bytecode size.
    /// * `vreg_count` - Largest virtual register count.
    /// * `try_blocks` - Largest try region count.
    ///
    /// # Returns
    ///
    /// The modified configuration (builder pattern).
    #[must_use]
    pub fn with_limits(mut self, bytecode_size: usize, vreg_count: usize, try_blocks: usize) -> Self {
        self.max_bytecode_size = bytecode_size;
        self.max_vreg_count = vreg_count;
        self.max_try_blocks = try_blocks;
        self
    }

    /// Enables or disables loop unrolling.
    ///
    /// # Arguments
    ///
    /// * `enable` - Whether to unroll loops.
    /// * `factor` - Number of body copies per unrolled loop.
    ///
    /// # Returns
    ///
    /// The modified configuration (builder pattern).
    #[must_use]
    pub fn with_loop_unroll(mut self, enable: bool, factor: usize) -> Self {
        self.enable_loop_unroll = enable;
        self.unroll_factor = factor;
        self
    }

    /// Enables or disables loop header peeling.
    #[must_use]
    pub fn with_loop_peeling(mut self, enable: bool) -> Self {
        self.enable_loop_peeling = enable;
        self
    }

    /// Switches between optimizing and bytecode-preserving linearization.
    #[must_use]
    pub fn with_bytecode_preserving(mut self, enable: bool) -> Self {
        self.bytecode_preserving = enable;
        self
    }

    /// Enables or disables running the graph checker after every pass.
    #[must_use]
    pub fn with_verification(mut self, enable: bool) -> Self {
        self.verify_after_each_pass = enable;
        self
    }

    /// Sets the target register description.
    #[must_use]
    pub fn with_target(mut self, target: TargetInfo) -> Self {
        self.target = target;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = CompilerOptions::default();
        assert!(options.enable_cleanup);
        assert!(!options.enable_loop_unroll);
        assert_eq!(options.unroll_factor, 4);
        assert_eq!(options.target.caller_saved_gp.len(), 8);
        assert!(options.any_pass_enabled());
    }

    #[test]
    fn test_presets() {
        assert!(CompilerOptions::aggressive().enable_loop_peeling);
        assert!(!CompilerOptions::fast().enable_move_constants);
        assert!(!CompilerOptions::disabled().any_pass_enabled());
    }

    #[test]
    fn test_builders() {
        let options = CompilerOptions::new()
            .with_limits(10, 20, 1)
            .with_loop_unroll(true, 2)
            .with_target(TargetInfo::callee_saved_only());
        assert_eq!(options.max_bytecode_size, 10);
        assert_eq!(options.max_try_blocks, 1);
        assert_eq!(options.unroll_factor, 2);
        assert!(options.target.caller_saved_fp.is_empty());
    }
}
