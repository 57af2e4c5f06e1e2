//! Per-compilation configuration.
//!
//! A [`CompilerConfig`] is built once before a compilation starts and is never
//! mutated afterwards. The pass manager hands it to every pass's enablement
//! predicate and rewrite step; when many graphs are compiled in parallel the
//! same value is shared behind an [`Arc`](std::sync::Arc).

use strum::{Display, EnumIter, IntoStaticStr};

/// Target architecture selector and capability queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
pub enum Arch {
    /// 64-bit ARM. Has `ldp`/`stp` and tolerates unaligned pairs.
    AArch64,
    /// 32-bit ARM. Has `ldrd`/`strd`, which require natural pair alignment.
    Arm32,
    /// x86-64. No paired load/store instructions.
    X86_64,
    /// 64-bit RISC-V. No paired load/store instructions.
    Riscv64,
}

impl Arch {
    /// Size of a native pointer in bytes.
    #[must_use]
    pub const fn pointer_size(self) -> u32 {
        match self {
            Arch::Arm32 => 4,
            Arch::AArch64 | Arch::X86_64 | Arch::Riscv64 => 8,
        }
    }

    /// Whether the target has paired load/store instructions.
    #[must_use]
    pub const fn supports_pair_access(self) -> bool {
        matches!(self, Arch::AArch64 | Arch::Arm32)
    }

    /// Whether paired accesses must be aligned to the pair's combined size.
    #[must_use]
    pub const fn requires_aligned_pairs(self) -> bool {
        matches!(self, Arch::Arm32)
    }

    /// Largest copy (in bytes) worth expanding inline instead of calling a runtime helper.
    #[must_use]
    pub const fn max_profitable_memcpy(self) -> u32 {
        match self {
            Arch::AArch64 => 128,
            Arch::Arm32 => 32,
            Arch::X86_64 => 64,
            Arch::Riscv64 => 64,
        }
    }
}

/// When the graph checker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum VerifyMode {
    /// Never run the checker.
    #[default]
    Off,
    /// Check the input graph and the graph after every pass that ran.
    AfterEachPass,
}

/// Configuration for one compilation.
///
/// Controls which passes are enabled, the target architecture, and the
/// verification and dump behaviour of the pass manager.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Target architecture.
    pub arch: Arch,

    /// Enable the instruction scheduler.
    pub enable_scheduler: bool,

    /// Enable load/store pair coalescing.
    pub enable_memory_coalescing: bool,

    /// Allow coalescing of reference-typed accesses.
    pub coalesce_objects: bool,

    /// Only form pairs whose address is provably aligned to the pair size.
    pub aligned_pairs_only: bool,

    /// Enable the code sinking pass.
    pub enable_code_sink: bool,

    /// Graph checker mode.
    pub verify: VerifyMode,

    /// Emit a textual dump of the graph at trace level after every pass that changed it.
    pub dump_after_pass: bool,

    /// Maximum number of markers a single pass may hold at once (at most 64).
    pub max_local_markers: u8,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            arch: Arch::AArch64,
            enable_scheduler: true,
            enable_memory_coalescing: true,
            coalesce_objects: false,
            aligned_pairs_only: true,
            enable_code_sink: true,
            verify: VerifyMode::Off,
            dump_after_pass: false,
            max_local_markers: 16,
        }
    }
}

impl CompilerConfig {
    /// Creates the default configuration: all passes on, aligned pairs only, no verification.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Release pipeline preset. Same as [`CompilerConfig::new`].
    #[must_use]
    pub fn release() -> Self {
        Self::default()
    }

    /// Debug pipeline preset: checker after every pass and graph dumps.
    #[must_use]
    pub fn debug() -> Self {
        Self {
            verify: VerifyMode::AfterEachPass,
            dump_after_pass: true,
            ..Self::default()
        }
    }

    /// Configuration with every optimization disabled.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enable_scheduler: false,
            enable_memory_coalescing: false,
            enable_code_sink: false,
            ..Self::default()
        }
    }

    /// Returns `true` if at least one pass is enabled.
    #[must_use]
    pub fn any_enabled(&self) -> bool {
        self.enable_scheduler || self.enable_memory_coalescing || self.enable_code_sink
    }

    /// Whether the coalescer must restrict itself to aligned pairs.
    ///
    /// True when the caller asked for strict alignment or the target cannot
    /// execute unaligned pairs.
    #[must_use]
    pub fn strict_pair_alignment(&self) -> bool {
        self.aligned_pairs_only || self.arch.requires_aligned_pairs()
    }

    /// Sets the target architecture.
    #[must_use]
    pub fn with_arch(mut self, arch: Arch) -> Self {
        self.arch = arch;
        self
    }

    /// Enables or disables the scheduler.
    #[must_use]
    pub fn with_scheduler(mut self, enable: bool) -> Self {
        self.enable_scheduler = enable;
        self
    }

    /// Enables or disables memory coalescing, and reference-typed pairs.
    #[must_use]
    pub fn with_memory_coalescing(mut self, enable: bool, objects: bool) -> Self {
        self.enable_memory_coalescing = enable;
        self.coalesce_objects = objects;
        self
    }

    /// Selects strict (aligned only) or relaxed pair alignment.
    #[must_use]
    pub fn with_aligned_pairs_only(mut self, aligned: bool) -> Self {
        self.aligned_pairs_only = aligned;
        self
    }

    /// Enables or disables code sinking.
    #[must_use]
    pub fn with_code_sink(mut self, enable: bool) -> Self {
        self.enable_code_sink = enable;
        self
    }

    /// Sets the checker mode.
    #[must_use]
    pub fn with_verify(mut self, verify: VerifyMode) -> Self {
        self.verify = verify;
        self
    }

    /// Enables graph dumps after changing passes.
    #[must_use]
    pub fn with_dumps(mut self, enable: bool) -> Self {
        self.dump_after_pass = enable;
        self
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = CompilerConfig::default();
        assert_eq!(config.arch, Arch::AArch64);
        assert!(config.any_enabled());
        assert!(!config.coalesce_objects);
        assert_eq!(config.verify, VerifyMode::Off);
    }

    #[test]
    fn test_disabled_config() {
        assert!(!CompilerConfig::disabled().any_enabled());
    }

    #[test]
    fn test_debug_preset_verifies() {
        let config = CompilerConfig::debug();
        assert_eq!(config.verify, VerifyMode::AfterEachPass);
        assert!(config.dump_after_pass);
    }

    #[test]
    fn test_strict_alignment_follows_arch() {
        let relaxed = CompilerConfig::new().with_aligned_pairs_only(false);
        assert!(!relaxed.strict_pair_alignment());
        assert!(relaxed.with_arch(Arch::Arm32).strict_pair_alignment());
    }

    #[test]
    fn test_pair_support_per_arch() {
        let supported: Vec<Arch> = Arch::iter().filter(|a| a.supports_pair_access()).collect();
        assert_eq!(supported, vec![Arch::AArch64, Arch::Arm32]);
        assert_eq!(Arch::Arm32.pointer_size(), 4);
    }
}
