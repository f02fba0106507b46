use super::*;

// ── WindowShiftConfig ─────────────────────────────────────────────────────

/// Plain window-shift configuration.
///
/// `timespan` and `timeshift` are either both positive (time mode) or both
/// absent (count mode); [`validate`](Self::validate) rejects a half-set
/// pair.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WindowShiftConfig {
    /// Elements a window holds before it completes itself.
    pub batch_size: usize,
    /// Count mode: every `skip`-th element opens a new window.
    pub skip: usize,
    /// Time mode: a window completes this long after it opened.
    pub timespan: Option<Duration>,
    /// Time mode: a new window opens at this interval.
    pub timeshift: Option<Duration>,
}

impl WindowShiftConfig {
    pub fn count(batch_size: usize, skip: usize) -> Self {
        Self {
            batch_size,
            skip,
            timespan: None,
            timeshift: None,
        }
    }

    pub fn timed(batch_size: usize, skip: usize, timespan: Duration, timeshift: Duration) -> Self {
        Self {
            batch_size,
            skip,
            timespan: Some(timespan),
            timeshift: Some(timeshift),
        }
    }

    /// `(timespan, timeshift)` when the configuration is in time mode.
    pub fn timing(&self) -> Option<(Duration, Duration)> {
        match (self.timespan, self.timeshift) {
            (Some(span), Some(shift)) if !span.is_zero() && !shift.is_zero() => {
                Some((span, shift))
            }
            _ => None,
        }
    }

    pub fn is_timed(&self) -> bool {
        self.timing().is_some()
    }

    /// Reject impossible configurations.
    ///
    /// `batch_size` and `skip` must be positive in every mode. A time pair
    /// with exactly one positive member is an error rather than a silent
    /// fall-back to count mode.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(anyhow!("batch_size must be positive"));
        }
        if self.skip == 0 {
            return Err(anyhow!("skip must be positive"));
        }
        let span_set = self.timespan.is_some_and(|d| !d.is_zero());
        let shift_set = self.timeshift.is_some_and(|d| !d.is_zero());
        if span_set != shift_set {
            return Err(anyhow!(
                "timespan and timeshift must be positive together; got timespan={:?}, timeshift={:?}",
                self.timespan,
                self.timeshift
            ));
        }
        Ok(())
    }
}

// ── WindowShift ───────────────────────────────────────────────────────────

/// Subscriber produced by [`WindowShift::subscriber`].
pub type WindowShiftSubscriber<T> = DemandSubscriber<T, Arc<WindowShiftEngine<T>>>;

/// Backpressure-aware window-shift operator.
///
/// Splits one upstream sequence into bounded windows emitted downstream as
/// hot publishers. One `WindowShift` can stamp out any number of
/// independent engines: each call to [`subscriber`](Self::subscriber)
/// wires a fresh registry.
pub struct WindowShift {
    config: WindowShiftConfig,
    timer: Option<Arc<dyn Timer>>,
}

impl WindowShift {
    /// Count-mode operator: a window opens at every `skip`-th element,
    /// starting with the first, and completes after `batch_size` elements.
    pub fn count(batch_size: usize, skip: usize) -> Result<Self> {
        Self::from_config(WindowShiftConfig::count(batch_size, skip), None)
    }

    /// Time-mode operator: a window opens every `timeshift` and completes
    /// `timespan` after it opened, or earlier if it fills up. Windows
    /// overlap when `timeshift < timespan`.
    pub fn timed(
        batch_size: usize,
        skip: usize,
        timespan: Duration,
        timeshift: Duration,
        timer: Arc<dyn Timer>,
    ) -> Result<Self> {
        Self::from_config(
            WindowShiftConfig::timed(batch_size, skip, timespan, timeshift),
            Some(timer),
        )
    }

    /// Build from a plain configuration. Fails fast on an invalid
    /// configuration and on time mode without a timer.
    pub fn from_config(config: WindowShiftConfig, timer: Option<Arc<dyn Timer>>) -> Result<Self> {
        config.validate()?;
        if config.is_timed() && timer.is_none() {
            return Err(anyhow!("time mode requires a timer"));
        }
        Ok(Self { config, timer })
    }

    pub fn config(&self) -> &WindowShiftConfig {
        &self.config
    }

    /// Wire a fresh engine in front of `downstream` and return the
    /// subscriber to attach upstream. The downstream receives its
    /// subscription when the upstream delivers ours.
    pub fn subscriber<T: Clone + Send + 'static>(
        &self,
        downstream: Arc<dyn Subscriber<Multicast<T>>>,
    ) -> Arc<WindowShiftSubscriber<T>> {
        let core = Arc::new(SubscriberCore::new());
        let engine = Arc::new(WindowShiftEngine::new(
            self.config.clone(),
            self.timer.clone(),
            downstream,
            Arc::clone(&core),
        ));
        Arc::new(DemandSubscriber::new(core, engine))
    }
}
