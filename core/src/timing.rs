//! Fixed and variable timestep loops.
//!
//! A [`LoopManager`] owns any number of independent timestep accumulators.
//! It is advanced exactly once per outer frame tick with
//! [`LoopManager::update_loops`], after which every loop exposes a read-only
//! [`LoopReference`] describing whether it runs this frame and with which
//! delta time.
//!
//! # Catch-up policies
//!
//! When the real elapsed time exceeds a loop's fixed step, the loop falls
//! behind. [`LoopCatchupMode`] decides what happens to that time debt:
//!
//! | Mode | Delta handed out | Debt |
//! |------|------------------|------|
//! | `FireAndForget` | whole accumulator | discarded |
//! | `SingleCorrectiveStep` | fixed step | carried forward, reported via [`LoopReference::debt_exceeds_step`] |
//! | `MultipleSteps` | fixed step | carried forward, drained by the caller via [`LoopManager::take_catchup_step`] |
//!
//! # Example
//!
//! ```
//! use lumen_core::timing::{LoopCatchupMode, LoopConfig, LoopManager};
//!
//! let mut loops = LoopManager::new();
//! let physics = loops.register_loop(
//!     LoopConfig::fixed("physics", 1.0 / 60.0).with_catchup_mode(LoopCatchupMode::FireAndForget),
//! );
//!
//! loops.set_current_frame(1);
//! loops.update_loops(1.0 / 30.0);
//!
//! let reference = loops.loop_reference(physics).unwrap();
//! assert!(reference.should_execute_this_frame);
//! assert_eq!(reference.step_count, 1);
//! ```

use std::fmt;

/// Smallest frame delta fed to the accumulators, in seconds.
///
/// Non-positive frame deltas are raised to this value so fixed-timestep
/// loops never stall.
pub const MIN_FRAME_TIME: f64 = 0.001;

/// Default upper bound on the delta a single tick may add to a loop.
pub const DEFAULT_MAX_CATCHUP_TIME: f64 = 0.25;

/// Ticks between repeated debt warnings for one loop.
const DEBT_WARN_INTERVAL: u64 = 120;

/// Raise a non-positive or NaN frame delta to [`MIN_FRAME_TIME`].
pub fn clamp_frame_delta(frame_delta: f64) -> f64 {
    // Also catches NaN.
    if frame_delta > 0.0 {
        frame_delta
    } else {
        MIN_FRAME_TIME
    }
}

/// Identifier of a registered loop.
///
/// Ids are handed out sequentially starting at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(u32);

impl LoopId {
    /// Create a loop id from a raw index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get the raw index.
    pub fn index(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loop#{}", self.0)
    }
}

/// Strategy used by a fixed-timestep loop once it has fallen behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoopCatchupMode {
    /// Run once with the whole accumulated time, then drop the debt.
    FireAndForget,
    /// Run once with the fixed step and keep the remaining debt.
    SingleCorrectiveStep,
    /// Run with the fixed step; the caller re-runs while debt remains.
    #[default]
    MultipleSteps,
}

/// Configuration of a single loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    /// Fixed step in seconds. `0.0` means the loop runs at frame rate.
    pub fixed_timestep: f64,
    /// Name used in diagnostics.
    pub name: String,
    /// What to do with accumulated time debt.
    pub catchup_mode: LoopCatchupMode,
    /// Largest delta a single tick may contribute, in seconds.
    pub max_catchup_time: f64,
}

impl LoopConfig {
    /// A loop that executes every frame with the frame's delta.
    pub fn variable(name: impl Into<String>) -> Self {
        Self {
            fixed_timestep: 0.0,
            name: name.into(),
            catchup_mode: LoopCatchupMode::default(),
            max_catchup_time: DEFAULT_MAX_CATCHUP_TIME,
        }
    }

    /// A loop that executes in steps of `timestep` seconds.
    pub fn fixed(name: impl Into<String>, timestep: f64) -> Self {
        Self {
            fixed_timestep: timestep.max(0.0),
            ..Self::variable(name)
        }
    }

    /// Set the catch-up policy.
    pub fn with_catchup_mode(mut self, mode: LoopCatchupMode) -> Self {
        self.catchup_mode = mode;
        self
    }

    /// Set the maximum delta a single tick may contribute.
    ///
    /// Values below [`MIN_FRAME_TIME`], NaN included, are raised to it.
    pub fn with_max_catchup_time(mut self, seconds: f64) -> Self {
        self.max_catchup_time = if seconds >= MIN_FRAME_TIME {
            seconds
        } else {
            log::warn!(
                "LoopConfig: max catch-up time {} for '{}' raised to {}s",
                seconds,
                self.name,
                MIN_FRAME_TIME
            );
            MIN_FRAME_TIME
        };
        self
    }

    /// Whether this loop runs at frame rate.
    pub fn is_variable(&self) -> bool {
        self.fixed_timestep <= 0.0
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::variable("loop")
    }
}

/// Read-only view of a loop after the latest update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopReference {
    /// The loop this view belongs to.
    pub loop_id: LoopId,
    /// Whether nodes bound to this loop run this frame.
    pub should_execute_this_frame: bool,
    /// Delta time handed to bound nodes, `0.0` when not executing.
    pub delta_time: f64,
    /// Total number of steps executed so far.
    pub step_count: u64,
    /// Frame index of the most recent execution.
    pub last_executed_frame: u64,
    /// Wall time spent by the most recent execution, in milliseconds.
    pub last_execution_time_ms: f64,
    /// Catch-up policy copied from the config.
    pub catchup_mode: LoopCatchupMode,
    /// Set when a `SingleCorrectiveStep` loop still owes at least one full
    /// step after this tick's step. The debt is reported, not drained.
    pub debt_exceeds_step: bool,
}

impl LoopReference {
    fn new(loop_id: LoopId, catchup_mode: LoopCatchupMode) -> Self {
        Self {
            loop_id,
            should_execute_this_frame: false,
            delta_time: 0.0,
            step_count: 0,
            last_executed_frame: 0,
            last_execution_time_ms: 0.0,
            catchup_mode,
            debt_exceeds_step: false,
        }
    }
}

#[derive(Debug)]
struct LoopState {
    config: LoopConfig,
    accumulator: f64,
    reference: LoopReference,
    /// Consecutive ticks with `debt_exceeds_step` set.
    debt_ticks: u64,
}

impl LoopState {
    fn update(&mut self, frame_delta: f64, frame: u64) {
        let dt = frame_delta.min(self.config.max_catchup_time);

        if self.config.is_variable() {
            self.execute(dt, frame);
            return;
        }

        let step = self.config.fixed_timestep;
        self.accumulator += dt;

        if self.accumulator < step {
            self.reference.should_execute_this_frame = false;
            self.reference.delta_time = 0.0;
            self.reference.debt_exceeds_step = false;
            self.debt_ticks = 0;
            return;
        }

        match self.config.catchup_mode {
            LoopCatchupMode::FireAndForget => {
                let delta = self.accumulator;
                self.accumulator = 0.0;
                self.execute(delta, frame);
            }
            LoopCatchupMode::SingleCorrectiveStep => {
                self.accumulator -= step;
                self.execute(step, frame);
                self.flag_debt(step);
            }
            LoopCatchupMode::MultipleSteps => {
                self.accumulator -= step;
                self.execute(step, frame);
            }
        }
    }

    fn flag_debt(&mut self, step: f64) {
        let behind = self.accumulator >= step;
        if behind {
            self.debt_ticks += 1;
            // First tick behind, then once every DEBT_WARN_INTERVAL ticks.
            if (self.debt_ticks - 1) % DEBT_WARN_INTERVAL == 0 {
                log::warn!(
                    "LoopManager: '{}' is {:.4}s behind ({:.1} steps) after {} tick(s)",
                    self.config.name,
                    self.accumulator,
                    self.accumulator / step,
                    self.debt_ticks
                );
            }
        } else {
            self.debt_ticks = 0;
        }
        self.reference.debt_exceeds_step = behind;
    }

    fn execute(&mut self, delta: f64, frame: u64) {
        self.reference.should_execute_this_frame = true;
        self.reference.delta_time = delta;
        self.reference.step_count += 1;
        self.reference.last_executed_frame = frame;
    }
}

/// Owner of every timestep loop in a graph.
#[derive(Debug, Default)]
pub struct LoopManager {
    loops: Vec<LoopState>,
    current_frame: u64,
}

impl LoopManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a loop and return its id.
    pub fn register_loop(&mut self, config: LoopConfig) -> LoopId {
        let id = LoopId::new(self.loops.len() as u32);
        log::debug!(
            "LoopManager: registered {} '{}' (timestep: {:.4}s, mode: {:?})",
            id,
            config.name,
            config.fixed_timestep,
            config.catchup_mode
        );
        self.loops.push(LoopState {
            reference: LoopReference::new(id, config.catchup_mode),
            accumulator: 0.0,
            debt_ticks: 0,
            config,
        });
        id
    }

    /// Get the current view of a loop, or `None` for an unknown id.
    pub fn loop_reference(&self, id: LoopId) -> Option<&LoopReference> {
        self.loops.get(id.0 as usize).map(|state| &state.reference)
    }

    /// Get the configuration of a loop.
    pub fn loop_config(&self, id: LoopId) -> Option<&LoopConfig> {
        self.loops.get(id.0 as usize).map(|state| &state.config)
    }

    /// Time currently owed to a fixed-timestep loop, in seconds.
    pub fn accumulator(&self, id: LoopId) -> Option<f64> {
        self.loops.get(id.0 as usize).map(|state| state.accumulator)
    }

    /// Number of registered loops.
    pub fn loop_count(&self) -> usize {
        self.loops.len()
    }

    /// Set the frame index recorded by executing loops.
    pub fn set_current_frame(&mut self, frame: u64) {
        self.current_frame = frame;
    }

    /// Get the frame index recorded by executing loops.
    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    /// Advance every loop by one outer frame tick.
    pub fn update_loops(&mut self, frame_delta: f64) {
        let frame_delta = clamp_frame_delta(frame_delta);
        for state in &mut self.loops {
            state.update(frame_delta, self.current_frame);
        }
    }

    /// Consume one more fixed step from a `MultipleSteps` loop.
    ///
    /// Returns `true` if the loop still owed at least one full step, in which
    /// case the step is taken off the accumulator and counted. Loops in other
    /// modes, variable loops and loops that did not execute this frame always
    /// return `false`.
    pub fn take_catchup_step(&mut self, id: LoopId) -> bool {
        let frame = self.current_frame;
        let Some(state) = self.loops.get_mut(id.0 as usize) else {
            return false;
        };

        if state.config.catchup_mode != LoopCatchupMode::MultipleSteps
            || state.config.is_variable()
            || !state.reference.should_execute_this_frame
            || state.accumulator < state.config.fixed_timestep
        {
            return false;
        }

        state.accumulator -= state.config.fixed_timestep;
        state.execute(state.config.fixed_timestep, frame);
        true
    }

    /// Record how long the latest execution of a loop took.
    pub fn record_execution_time(&mut self, id: LoopId, milliseconds: f64) {
        if let Some(state) = self.loops.get_mut(id.0 as usize) {
            state.reference.last_execution_time_ms = milliseconds;
        }
    }
}
