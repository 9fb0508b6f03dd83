//! A global store of flags that can impact the analysis.
//!
//! WARNING: Currently only supports a single consistent configuration amongst threads. Library
//! users that need differing configurations should pass an explicit [`AnalysisConfig`] to
//! [`ApproximabilityAnalysis::analyze_with_config`](crate::analysis::ApproximabilityAnalysis::analyze_with_config).

/// Flags tuning a run of the analysis. The process-wide instance is [`CONFIG`](static@CONFIG).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AnalysisConfig {
    /// Run the forward pass that catches pointers stored as data. Without it, only the backward
    /// walk from sinks is performed.
    pub forward_propagation: bool,
    /// Also propagate forward from every instruction shallowly equivalent to a tracked (non-stack
    /// slot) address.
    pub address_broadening: bool,
    /// Treat branches as sinks, making their conditions exact.
    pub branches_are_sinks: bool,
    /// Use deep (rather than shallow) structural equivalence for address-set membership.
    pub deep_address_equivalence: bool,
    /// Feed instructions newly marked by the forward pass back into the backward walk, repeating
    /// until the address set stops growing.
    pub fixed_point_iteration: bool,
}

impl AnalysisConfig {
    /// Internal method: sets up initialization
    #[allow(static_mut_refs)]
    fn from_initialized() -> Self {
        let init = unsafe {
            INTERNAL_CONFIG_INITIALIZER
                .take()
                .expect("Should be initialized only once")
        };
        init.unwrap_or_default()
    }

    /// Initialize with the given command line configuration. Should only be called once, and should
    /// only be called from `main`.
    #[allow(static_mut_refs)]
    pub fn initialize(command_line_config: Vec<CommandLineAnalysisConfig>) {
        let prev = unsafe { INTERNAL_CONFIG_INITIALIZER.replace(Some(command_line_config.into())) };
        assert!(prev.is_some(), "Performed double initialization");
        lazy_static::initialize(&CONFIG);
    }
}

/// Internal initialization detail.
static mut INTERNAL_CONFIG_INITIALIZER: Option<Option<AnalysisConfig>> = Some(None);

lazy_static::lazy_static! {
    /// The global configuration store
    pub static ref CONFIG: AnalysisConfig = AnalysisConfig::from_initialized();
}

#[derive(clap::ArgEnum, Clone, Debug)]
/// Analysis configuration parameters
pub enum CommandLineAnalysisConfig {
    DisableForwardPropagation,
    DisableAddressBroadening,
    DisableBranchSinks,
    DisableDeepAddressEquivalence,
    DisableFixedPointIteration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            forward_propagation: true,
            address_broadening: true,
            branches_are_sinks: true,
            deep_address_equivalence: true,
            fixed_point_iteration: true,
        }
    }
}

impl From<Vec<CommandLineAnalysisConfig>> for AnalysisConfig {
    fn from(v: Vec<CommandLineAnalysisConfig>) -> Self {
        use CommandLineAnalysisConfig::*;
        let mut r = AnalysisConfig::default();
        for v in v {
            match v {
                DisableForwardPropagation => {
                    r.forward_propagation = false;
                }
                DisableAddressBroadening => {
                    r.address_broadening = false;
                }
                DisableBranchSinks => {
                    r.branches_are_sinks = false;
                }
                DisableDeepAddressEquivalence => {
                    r.deep_address_equivalence = false;
                }
                DisableFixedPointIteration => {
                    r.fixed_point_iteration = false;
                }
            }
        }
        r
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn command_line_flags_turn_features_off() {
        let c: AnalysisConfig = vec![
            CommandLineAnalysisConfig::DisableBranchSinks,
            CommandLineAnalysisConfig::DisableFixedPointIteration,
        ]
        .into();
        assert!(!c.branches_are_sinks);
        assert!(!c.fixed_point_iteration);
        assert!(c.forward_propagation && c.address_broadening && c.deep_address_equivalence);
        assert_eq!(AnalysisConfig::from(vec![]), AnalysisConfig::default());
    }
}
