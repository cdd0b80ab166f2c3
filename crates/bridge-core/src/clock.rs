//! Clock edges, the modeled-device seam, and edge observer registration.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};

use log::trace;

use crate::BridgeError;

/// Cycle-evaluable black box driven by the bridge.
///
/// Implementations are generated hardware models or test fakes. Input pins
/// written between two `eval` calls become visible to combinational logic
/// only after the next `eval`.
pub trait Device {
    /// Settles the model for the current pin values without advancing time.
    fn eval(&mut self);

    /// Drives the model's clock pin.
    fn set_clock(&mut self, high: bool);

    /// Returns true while the model still has internal work in flight.
    ///
    /// Used by [`Clock::wait_quiescent`] after a run/start command has been
    /// issued to a modeled core.
    fn busy(&self) -> bool {
        false
    }
}

/// Component notified on every clock transition.
///
/// Observers run in registration order. Two observers must not depend on
/// each other's ordering within the same edge.
pub trait EdgeObserver<D> {
    /// Called after the device has been evaluated with the clock high.
    fn on_rising(&mut self, device: &mut D) {
        let _ = device;
    }

    /// Called after the device has been evaluated with the clock low.
    fn on_falling(&mut self, device: &mut D) {
        let _ = device;
    }
}

#[derive(Clone, Copy)]
enum Edge {
    Rising,
    Falling,
}

/// Scoped registration of an edge observer.
///
/// The observer stays attached to its [`Clock`] exactly as long as this
/// handle is alive; dropping it detaches the observer before the next edge.
#[derive(Debug)]
pub struct Attached<O> {
    observer: Rc<RefCell<O>>,
}

impl<O> Attached<O> {
    /// Immutably borrows the attached observer.
    ///
    /// # Panics
    ///
    /// Panics if called from inside the observer's own edge callback.
    #[must_use]
    pub fn borrow(&self) -> Ref<'_, O> {
        self.observer.borrow()
    }

    /// Mutably borrows the attached observer.
    ///
    /// # Panics
    ///
    /// Panics if called from inside the observer's own edge callback.
    #[must_use]
    pub fn borrow_mut(&self) -> RefMut<'_, O> {
        self.observer.borrow_mut()
    }
}

/// Owner of simulated time for one device.
///
/// Exactly one thread owns a `Clock` and steps it; observers are only ever
/// touched from that thread.
pub struct Clock<D: Device> {
    device: D,
    observers: Vec<Weak<RefCell<dyn EdgeObserver<D>>>>,
    cycles: u64,
}

impl<D: Device> Clock<D> {
    /// Wraps a device with the clock pin driven low.
    pub fn new(mut device: D) -> Self {
        device.set_clock(false);
        device.eval();
        Self {
            device,
            observers: Vec::new(),
            cycles: 0,
        }
    }

    /// Registers an observer and returns the handle that keeps it attached.
    pub fn attach<O>(&mut self, observer: O) -> Attached<O>
    where
        O: EdgeObserver<D> + 'static,
    {
        let observer = Rc::new(RefCell::new(observer));
        let erased: Rc<RefCell<dyn EdgeObserver<D>>> = observer.clone();
        self.observers.push(Rc::downgrade(&erased));
        Attached { observer }
    }

    /// Number of observers whose handles are still alive.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers
            .iter()
            .filter(|observer| observer.strong_count() > 0)
            .count()
    }

    /// Full cycles stepped since construction.
    #[must_use]
    pub const fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Shared access to the modeled device.
    #[must_use]
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// Exclusive access to the modeled device.
    #[allow(clippy::missing_const_for_fn)]
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Consumes the clock and returns the device.
    pub fn into_device(self) -> D {
        self.device
    }

    /// Re-evaluates the device without advancing time.
    pub fn eval(&mut self) {
        self.device.eval();
    }

    /// Advances simulated time by one full cycle.
    pub fn step(&mut self) {
        self.device.set_clock(true);
        self.device.eval();
        self.notify(Edge::Rising);
        self.device.eval();

        self.device.set_clock(false);
        self.device.eval();
        self.notify(Edge::Falling);
        self.device.eval();

        self.cycles += 1;
    }

    /// Steps `cycles` full cycles.
    pub fn run(&mut self, cycles: u64) {
        for _ in 0..cycles {
            self.step();
        }
    }

    /// Steps until `done` holds for the device, checking before every step.
    ///
    /// Returns false if `done` still fails after `budget` cycles.
    pub fn run_until(&mut self, budget: u64, mut done: impl FnMut(&D) -> bool) -> bool {
        for _ in 0..budget {
            if done(&self.device) {
                return true;
            }
            self.step();
        }
        done(&self.device)
    }

    /// Steps until the device reports idle, returning the cycles spent.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::QuiescenceTimeout`] when the device is still
    /// busy after `budget` cycles.
    pub fn wait_quiescent(&mut self, budget: u64) -> Result<u64, BridgeError> {
        let start = self.cycles;
        if self.run_until(budget, |device| !device.busy()) {
            Ok(self.cycles - start)
        } else {
            Err(BridgeError::QuiescenceTimeout { cycles: budget })
        }
    }

    fn notify(&mut self, edge: Edge) {
        let Self {
            device, observers, ..
        } = self;

        let before = observers.len();
        observers.retain(|observer| observer.strong_count() > 0);
        if observers.len() != before {
            trace!("pruned {} detached observers", before - observers.len());
        }

        for observer in observers.iter() {
            let Some(observer) = observer.upgrade() else {
                continue;
            };
            let mut observer = observer.borrow_mut();
            match edge {
                Edge::Rising => observer.on_rising(device),
                Edge::Falling => observer.on_falling(device),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{Clock, Device, EdgeObserver};
    use crate::BridgeError;

    #[derive(Default)]
    struct Probe {
        clock: bool,
        evals: u32,
        busy_for: u64,
        log: Vec<&'static str>,
    }

    impl Device for Probe {
        fn eval(&mut self) {
            self.evals += 1;
        }

        fn set_clock(&mut self, high: bool) {
            if self.clock && !high && self.busy_for > 0 {
                self.busy_for -= 1;
            }
            self.clock = high;
            self.log.push(if high { "clk=1" } else { "clk=0" });
        }

        fn busy(&self) -> bool {
            self.busy_for > 0
        }
    }

    struct Recorder {
        name: &'static str,
        seen: Rc<RefCell<Vec<String>>>,
    }

    impl EdgeObserver<Probe> for Recorder {
        fn on_rising(&mut self, device: &mut Probe) {
            assert!(device.clock);
            self.seen.borrow_mut().push(format!("{}:rise", self.name));
        }

        fn on_falling(&mut self, device: &mut Probe) {
            assert!(!device.clock);
            self.seen.borrow_mut().push(format!("{}:fall", self.name));
        }
    }

    #[test]
    fn step_toggles_clock_and_evaluates_around_every_edge() {
        let mut clock = Clock::new(Probe::default());
        let evals_after_new = clock.device().evals;

        clock.step();

        assert_eq!(clock.device().evals - evals_after_new, 4);
        assert_eq!(clock.cycles(), 1);
        assert!(!clock.device().clock);
        assert_eq!(clock.device().log, ["clk=0", "clk=1", "clk=0"]);
    }

    #[test]
    fn observers_run_in_registration_order_on_both_edges() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut clock = Clock::new(Probe::default());
        let _first = clock.attach(Recorder {
            name: "a",
            seen: Rc::clone(&seen),
        });
        let _second = clock.attach(Recorder {
            name: "b",
            seen: Rc::clone(&seen),
        });

        clock.step();

        assert_eq!(*seen.borrow(), ["a:rise", "b:rise", "a:fall", "b:fall"]);
    }

    #[test]
    fn dropping_the_handle_detaches_the_observer() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut clock = Clock::new(Probe::default());
        let first = clock.attach(Recorder {
            name: "a",
            seen: Rc::clone(&seen),
        });
        let _second = clock.attach(Recorder {
            name: "b",
            seen: Rc::clone(&seen),
        });
        assert_eq!(clock.observer_count(), 2);

        drop(first);
        assert_eq!(clock.observer_count(), 1);
        clock.step();

        assert_eq!(*seen.borrow(), ["b:rise", "b:fall"]);
    }

    #[test]
    fn attached_handle_exposes_observer_state_between_steps() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut clock = Clock::new(Probe::default());
        let handle = clock.attach(Recorder {
            name: "a",
            seen: Rc::clone(&seen),
        });

        clock.step();
        handle.borrow_mut().name = "renamed";
        clock.step();

        assert_eq!(handle.borrow().name, "renamed");
        assert_eq!(seen.borrow().last().map(String::as_str), Some("renamed:fall"));
    }

    #[test]
    fn wait_quiescent_counts_cycles_until_idle() {
        let mut clock = Clock::new(Probe {
            busy_for: 5,
            ..Probe::default()
        });

        assert_eq!(clock.wait_quiescent(100), Ok(5));
        assert_eq!(clock.wait_quiescent(100), Ok(0));
    }

    #[test]
    fn wait_quiescent_gives_up_after_budget() {
        let mut clock = Clock::new(Probe {
            busy_for: 50,
            ..Probe::default()
        });

        assert_eq!(
            clock.wait_quiescent(10),
            Err(BridgeError::QuiescenceTimeout { cycles: 10 })
        );
        assert_eq!(clock.cycles(), 10);
    }

    #[test]
    fn run_until_checks_before_stepping() {
        let mut clock = Clock::new(Probe::default());
        assert!(clock.run_until(10, |_| true));
        assert_eq!(clock.cycles(), 0);

        assert!(!clock.run_until(3, |_| false));
        assert_eq!(clock.cycles(), 3);
    }
}
