use std::collections::BTreeMap;
use std::env;
use std::sync::RwLock;

lazy_static! {
    static ref GATES: RwLock<Option<BTreeMap<String, bool>>> = RwLock::new(None);
}

/// Gate names understood by the core
pub const FULL_LIFECYCLE_API: &str = "FullLifecycleAPI";
pub const MACHINE_HEALTH_CHECKS: &str = "MachineHealthChecks";

fn load_from_env() -> BTreeMap<String, bool> {
    let mut gates = BTreeMap::new();
    // FEATURE_GATES=Name=true,Other=false takes the base values
    if let Ok(list) = env::var("FEATURE_GATES") {
        for pair in list.split(',') {
            let mut kv = pair.splitn(2, '=');
            if let (Some(k), Some(v)) = (kv.next(), kv.next()) {
                gates.insert(k.trim().to_string(), v.trim() == "true");
            }
        }
    }
    // FEATURE_<NAME>=true wins over the list entry
    for (key, value) in env::vars() {
        if let Some(name) = key.strip_prefix("FEATURE_") {
            if name == "GATES" {
                continue;
            }
            gates.insert(name.to_string(), value == "true");
        }
    }
    gates
}

/// Whether a named gate is enabled
///
/// The environment is read once on first use; later env changes are not
/// observed until `reset_for_test`.
pub fn enabled(name: &str) -> bool {
    {
        let cached = GATES.read().unwrap();
        if let Some(gates) = cached.as_ref() {
            return gates.get(name).copied().unwrap_or(false);
        }
    }
    let mut cached = GATES.write().unwrap();
    let gates = cached.get_or_insert_with(load_from_env);
    gates.get(name).copied().unwrap_or(false)
}

/// Drop the cache so the next read re-reads the environment
pub fn reset_for_test() {
    *GATES.write().unwrap() = None;
}

#[cfg(test)]
mod tests {
    use super::{enabled, reset_for_test};
    use std::env;

    #[test]
    fn gates_cache_and_reset() {
        reset_for_test();
        env::remove_var("FEATURE_GATES");
        env::remove_var("FEATURE_UNITTESTGATE");
        assert!(!enabled("UnitTestGate"));

        // cached: flipping the env alone changes nothing
        env::set_var("FEATURE_UNITTESTGATE", "true");
        assert!(!enabled("UNITTESTGATE"));

        reset_for_test();
        assert!(enabled("UNITTESTGATE"));

        reset_for_test();
        env::remove_var("FEATURE_UNITTESTGATE");
        env::set_var("FEATURE_GATES", "UNITTESTGATE=true,Other=false");
        assert!(enabled("UNITTESTGATE"));
        assert!(!enabled("Other"));

        env::remove_var("FEATURE_GATES");
        reset_for_test();
    }
}
