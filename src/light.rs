//! Lighting control.
//!
//! The lighting hardware and the growth-light interlock live outside this
//! crate. They are reached through [`LightController`], which any
//! `FnMut(LightChannel, bool)` closure implements.

use crate::settings::LightChannel;

/// Switches lighting channels on and off.
///
/// Calls are expected to be synchronous, fast and idempotent.
pub trait LightController {
    /// Turns `channel` on or off.
    fn set(&mut self, channel: LightChannel, on: bool);
}

impl<F> LightController for F
where
    F: FnMut(LightChannel, bool),
{
    fn set(&mut self, channel: LightChannel, on: bool) {
        self(channel, on)
    }
}

/// Keeps a channel lit until switched off or dropped.
pub struct LightGuard<'a, L: LightController + ?Sized> {
    lights: &'a mut L,
    channel: LightChannel,
    lit: bool,
}

impl<'a, L: LightController + ?Sized> LightGuard<'a, L> {
    /// Turns `channel` on.
    pub fn on(lights: &'a mut L, channel: LightChannel) -> Self {
        lights.set(channel, true);
        tracing::debug!(channel = %channel, "Light on");
        Self {
            lights,
            channel,
            lit: true,
        }
    }

    /// Turns the channel off; later calls and the drop do nothing.
    pub fn off(&mut self) {
        if self.lit {
            self.lights.set(self.channel, false);
            self.lit = false;
            tracing::debug!(channel = %self.channel, "Light off");
        }
    }

    /// Returns true while the channel is lit.
    pub fn is_lit(&self) -> bool {
        self.lit
    }
}

impl<L: LightController + ?Sized> Drop for LightGuard<'_, L> {
    fn drop(&mut self) {
        self.off();
    }
}

/// Controller that records every switch and logs it.
///
/// Used when no lighting hardware is attached, and by tests to check that
/// lights end up off.
#[derive(Debug, Default, Clone)]
pub struct LightLog {
    events: Vec<(LightChannel, bool)>,
}

impl LightLog {
    /// Creates a log with every channel off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every switch in order.
    pub fn events(&self) -> &[(LightChannel, bool)] {
        &self.events
    }

    /// Last known state of `channel`.
    pub fn is_on(&self, channel: LightChannel) -> bool {
        self.events
            .iter()
            .rev()
            .find(|(c, _)| *c == channel)
            .map_or(false, |(_, on)| *on)
    }

    /// Returns true if no channel is left on.
    pub fn all_off(&self) -> bool {
        LightChannel::ALL.iter().all(|c| !self.is_on(*c))
    }
}

impl LightController for LightLog {
    fn set(&mut self, channel: LightChannel, on: bool) {
        tracing::info!(channel = %channel, on, "Switching light");
        self.events.push((channel, on));
    }
}
