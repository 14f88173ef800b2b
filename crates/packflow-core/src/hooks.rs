use std::collections::HashMap;
use std::fmt;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

/// The opaque options bag passed to every hook callback.
pub type HookOpts = Value;

pub type HookFn = Box<dyn Fn(&HookOpts) -> Result<()>>;

/// Mapping from hook-key string to its ordered callbacks.
///
/// Keys are free-form, constructed by convention as `before.<command>`,
/// `after.<command>` and the per-configuration variants.
#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<String, Vec<HookFn>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a callback for `key`. The same callback may be registered
    /// multiple times and will run that many times.
    pub fn on(&mut self, key: &str, callback: HookFn) {
        self.hooks.entry(key.to_string()).or_default().push(callback);
    }

    /// Invokes every callback for `key` strictly in registration order,
    /// each run to completion before the next starts. An absent key is a
    /// no-op. The first failing callback aborts the remainder: later hooks
    /// may assume earlier ones succeeded.
    pub fn apply(&self, key: &str, opts: &HookOpts) -> Result<()> {
        let Some(callbacks) = self.hooks.get(key) else {
            return Ok(());
        };
        debug!("applying {} hook callback(s) for '{}'", callbacks.len(), key);
        for (index, callback) in callbacks.iter().enumerate() {
            callback(opts).with_context(|| format!("hook '{key}' callback #{index} failed"))?;
        }
        Ok(())
    }

    /// Number of callbacks registered for `key`.
    pub fn registered(&self, key: &str) -> usize {
        self.hooks.get(key).map_or(0, Vec::len)
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, callbacks) in &self.hooks {
            map.entry(key, &callbacks.len());
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn apply_without_callbacks_is_a_noop() {
        let registry = HookRegistry::new();
        registry
            .apply("before.build", &json!({}))
            .expect("absent key should resolve");
    }

    #[test]
    fn callbacks_run_in_registration_order() {
        let mut registry = HookRegistry::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let log = Rc::clone(&log);
            registry.on(
                "before.dev",
                Box::new(move |_opts| {
                    log.borrow_mut().push(label);
                    Ok(())
                }),
            );
        }

        registry.apply("before.dev", &json!({})).unwrap();
        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn same_callback_registered_twice_runs_twice() {
        let mut registry = HookRegistry::new();
        let counter = Rc::new(RefCell::new(0));
        for _ in 0..2 {
            let counter = Rc::clone(&counter);
            registry.on(
                "after.build",
                Box::new(move |_opts| {
                    *counter.borrow_mut() += 1;
                    Ok(())
                }),
            );
        }

        registry.apply("after.build", &json!({})).unwrap();
        assert_eq!(*counter.borrow(), 2);
    }

    #[test]
    fn failing_callback_aborts_the_remainder() {
        let mut registry = HookRegistry::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        {
            let log = Rc::clone(&log);
            registry.on(
                "before.build",
                Box::new(move |_opts| {
                    log.borrow_mut().push("ran");
                    Ok(())
                }),
            );
        }
        registry.on("before.build", Box::new(|_opts| bail!("boom")));
        {
            let log = Rc::clone(&log);
            registry.on(
                "before.build",
                Box::new(move |_opts| {
                    log.borrow_mut().push("never");
                    Ok(())
                }),
            );
        }

        let err = registry
            .apply("before.build", &json!({}))
            .expect_err("must fail");
        assert!(format!("{err:#}").contains("boom"));
        assert_eq!(*log.borrow(), vec!["ran"]);
    }

    #[test]
    fn callbacks_receive_the_opts_bag() {
        let mut registry = HookRegistry::new();
        let seen = Rc::new(RefCell::new(Value::Null));
        {
            let seen = Rc::clone(&seen);
            registry.on(
                "after.dev",
                Box::new(move |opts| {
                    *seen.borrow_mut() = opts.clone();
                    Ok(())
                }),
            );
        }

        registry.apply("after.dev", &json!({"port": 3000})).unwrap();
        assert_eq!(*seen.borrow(), json!({"port": 3000}));
    }
}
