//! Named digital signals exposed by a modeled device.

use std::fmt;

/// A named digital signal with get/set access.
///
/// Devices expose bundles of wires instead of raw pin pointers, so every
/// adapter can be driven against a fake device as easily as a generated model.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Wire<T: Copy> {
    name: &'static str,
    value: T,
}

impl<T: Copy> Wire<T> {
    /// Creates a wire with an initial value.
    #[must_use]
    pub const fn new(name: &'static str, value: T) -> Self {
        Self { name, value }
    }

    /// Signal name as it appears on the modeled device.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Current value.
    #[must_use]
    pub const fn get(&self) -> T {
        self.value
    }

    /// Drives a new value. Combinational effects are visible only after the
    /// owning device is evaluated again.
    #[allow(clippy::missing_const_for_fn)]
    pub fn set(&mut self, value: T) {
        self.value = value;
    }
}

impl Wire<bool> {
    /// Creates a single-bit wire driven low.
    #[must_use]
    pub const fn low(name: &'static str) -> Self {
        Self::new(name, false)
    }

    /// Returns true when the wire is driven high.
    #[must_use]
    pub const fn is_high(&self) -> bool {
        self.value
    }
}

impl<T: Copy + Default> Wire<T> {
    /// Creates a wire holding the type's zero value.
    #[must_use]
    pub fn zeroed(name: &'static str) -> Self {
        Self::new(name, T::default())
    }
}

impl<T: Copy + fmt::Debug> fmt::Debug for Wire<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:?}", self.name, self.value)
    }
}
