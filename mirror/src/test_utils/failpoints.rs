use fail::FailScenario;

/// Configures failpoints until dropped, then turns them off again.
///
/// Holding the guard also serializes failpoint tests, since the underlying [`FailScenario`]
/// takes a process wide lock.
pub struct CustomFailScenario<'a> {
    _scenario: FailScenario<'a>,
    failpoints: Vec<String>,
}

impl<'a> CustomFailScenario<'a> {
    /// Applies each `(failpoint, action)` pair, for example `("sync.before_commit", "return")`.
    pub fn setup(failpoints: &[(&str, &str)]) -> CustomFailScenario<'a> {
        let scenario = FailScenario::setup();

        for (failpoint, action) in failpoints {
            fail::cfg(*failpoint, action).expect("failpoint action is valid");
        }

        Self {
            _scenario: scenario,
            failpoints: failpoints.iter().map(|(name, _)| name.to_string()).collect(),
        }
    }

    /// Turns the failpoints off while keeping the guard, to let a retry through.
    pub fn disable(&self) {
        for failpoint in &self.failpoints {
            fail::cfg(failpoint.as_str(), "off").expect("failpoint can be turned off");
        }
    }

    pub fn teardown(self) {
        drop(self);
    }
}

impl Drop for CustomFailScenario<'_> {
    fn drop(&mut self) {
        self.disable();
    }
}
