//! The Test Group Base (spec.md §4.2): common lifecycle shared by all four
//! probe groups. Rust has no base class to inherit from, so the shared
//! behavior lives in the free function [`run_group`], which drives any
//! `&dyn TestGroup` the same way the Python `TestGroup.runTest` drives its
//! subclasses (REDESIGN FLAGS: "polymorphic test group").

use crate::config::GlobalConfig;
use crate::probe::ProbeSet;
use crate::results::{GlobalResults, GroupResults};

/// Declarative metadata plus the three operations a group implements
/// itself: `default_results`, `should_skip`, `spawn`, `summarize`.
pub trait TestGroup: Send + Sync {
    fn tag(&self) -> &'static str;

    fn prereqs(&self) -> &'static [&'static str] {
        &[]
    }

    /// The all-failed result tree, valid the instant it is produced so
    /// skip logic downstream always has a well-defined shape to read
    /// (spec.md §3 invariant (b)).
    fn default_results(&self) -> GroupResults;

    /// Consumes the freshly built defaults and returns them, possibly with
    /// some families upgraded from "not routable" to an empty, probe-ready
    /// map, alongside an optional skip reason. When every family fails its
    /// survivability check the returned tree is identical to what was
    /// passed in, which is exactly spec.md §3 invariant (a)/(b): a skipped
    /// group's installed results equal its defaults. Takes this group's own
    /// config because surviving families are pre-populated with the slots
    /// `spawn` will later write into (e.g. DNS's per-hostname map), and
    /// only the config says which hostnames/ports/strategies those are.
    fn should_skip(
        &self,
        defaults: GroupResults,
        config: &GlobalConfig,
        upstream: &GlobalResults,
    ) -> (GroupResults, Option<String>);

    /// Spawn this group's probes. `results` is this group's own entry,
    /// already installed in the registry; implementations clone out the
    /// `Arc<Mutex<_>>` leaves they need into each spawned future.
    fn spawn(&self, config: &GlobalConfig, results: &GroupResults, probes: &mut ProbeSet);

    /// Render the final human-readable summary once every probe has been
    /// joined (or timed out).
    fn summarize(&self, results: &GroupResults, config: &GlobalConfig) -> String;
}

/// Outcome of running one group, mirroring what spec.md §4.1's scheduler
/// needs to print: either a skip reason, or an elapsed time plus summary.
pub enum GroupOutcome {
    Skipped(String),
    Ran { elapsed_secs: f64, summary: String },
}

/// Runs one group to completion: install defaults, check skip, spawn and
/// join probes if not skipped, summarize.
pub async fn run_group(
    group: &dyn TestGroup,
    config: &GlobalConfig,
    global_results: &mut GlobalResults,
) -> GroupOutcome {
    let tag = group.tag();
    let defaults = group.default_results();
    let (prepared, skip_reason) = group.should_skip(defaults, config, global_results);
    global_results.insert(tag.to_string(), prepared);

    if let Some(reason) = skip_reason {
        return GroupOutcome::Skipped(reason);
    }

    let start = std::time::Instant::now();
    let mut probes = ProbeSet::new(tag);
    {
        let results = global_results.get(tag).expect("just inserted");
        group.spawn(config, results, &mut probes);
    }
    probes.join_all().await;

    let summary = {
        let results = global_results.get(tag).expect("just inserted");
        group.summarize(results, config)
    };
    let elapsed_secs = (start.elapsed().as_secs_f64() * 1000.0).round() / 1000.0;

    GroupOutcome::Ran { elapsed_secs, summary }
}
