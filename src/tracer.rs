use crate::{
    bus::{Event, FactKind},
    transys::property::PropStatus,
};
use giputils::hash::GHashMap;
use log::{debug, info};
use std::{
    ops::Deref,
    sync::mpsc::{self, Receiver, Sender},
};

pub trait TracerIf: Sync + Send {
    /// Trace an event broadcast by engine `from`.
    fn trace_event(&mut self, _from: &str, _event: &Event) {}
}

/// Sender part of channel tracer
pub struct ChannelTracerSx(Sender<(String, Event)>);

impl TracerIf for ChannelTracerSx {
    fn trace_event(&mut self, from: &str, event: &Event) {
        let _ = self.0.send((from.to_string(), event.clone()));
    }
}

/// Receiver part of channel tracer
pub struct ChannelTracerRx(Receiver<(String, Event)>);

impl Deref for ChannelTracerRx {
    type Target = Receiver<(String, Event)>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Create a channel tracer pair (sender, receiver)
pub fn channel_tracer() -> (ChannelTracerSx, ChannelTracerRx) {
    let (tx, rx) = mpsc::channel();
    (ChannelTracerSx(tx), ChannelTracerRx(rx))
}

#[derive(Default)]
pub struct Tracer {
    tracers: Vec<Box<dyn TracerIf>>,
}

impl Tracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tracer(&mut self, tracer: Box<dyn TracerIf>) {
        self.tracers.push(tracer);
    }

    pub fn trace_event(&mut self, from: &str, event: &Event) {
        for t in self.tracers.iter_mut() {
            t.trace_event(from, event);
        }
    }
}

/// Logs status changes and discovered invariants.
#[derive(Default)]
pub struct LogTracer {
    ktrue: GHashMap<String, usize>,
}

impl LogTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only report `KTrue` bounds that grow.
    fn update_ktrue(&mut self, prop: &str, k: usize) -> bool {
        match self.ktrue.get(prop) {
            Some(l) if *l >= k => false,
            _ => {
                self.ktrue.insert(prop.to_string(), k);
                true
            }
        }
    }
}

impl TracerIf for LogTracer {
    fn trace_event(&mut self, from: &str, event: &Event) {
        match event {
            Event::Status { prop, status } => match status {
                PropStatus::Invariant => info!("{from} proved {prop}"),
                PropStatus::False(cex) => {
                    info!("{from} found a counterexample for {prop} at depth {}", cex.len())
                }
                PropStatus::KTrue(k) => {
                    if self.update_ktrue(prop, *k) {
                        info!("{from} found no counterexample for {prop} up to depth {k}")
                    }
                }
                PropStatus::Unknown => (),
            },
            Event::Invariant {
                kind, scope, term, ..
            } => {
                let kind = match kind {
                    FactKind::OneState => "one-state",
                    FactKind::TwoState => "two-state",
                };
                debug!("{from} found {kind} invariant in {scope}: {term}")
            }
        }
    }
}
