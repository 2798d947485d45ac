//! Broadcast channel between engines.

use crate::{
    term::Term,
    tracer::{Tracer, TracerIf},
    transys::property::PropStatus,
};
use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
    mpsc::{self, Receiver, Sender},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FactKind {
    OneState,
    TwoState,
}

impl FactKind {
    /// Two-state facts relate a state to its successor.
    pub fn of(t: &Term) -> Self {
        match t.offsets() {
            Some((lo, hi)) if hi > lo => FactKind::TwoState,
            _ => FactKind::OneState,
        }
    }
}

/// How an invariant was established.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cert {
    pub engine: &'static str,
    /// Induction depth.
    pub k: usize,
}

#[derive(Clone, Debug)]
pub enum Event {
    Invariant {
        kind: FactKind,
        scope: String,
        term: Term,
        cert: Option<Cert>,
    },
    Status {
        prop: String,
        status: PropStatus,
    },
}

pub struct Bus {
    subscribers: Mutex<Vec<(usize, Sender<Event>)>>,
    tracer: Mutex<Tracer>,
    next_id: AtomicUsize,
}

impl Bus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: Mutex::new(Vec::new()),
            tracer: Mutex::new(Tracer::new()),
            next_id: AtomicUsize::new(0),
        })
    }

    /// Tracers observe every broadcast event once, tagged with its sender.
    pub fn add_tracer(&self, tracer: Box<dyn TracerIf>) {
        self.tracer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add_tracer(tracer);
    }

    pub fn mailbox(self: &Arc<Self>, name: &str) -> Mailbox {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, tx));
        Mailbox {
            id,
            name: name.to_string(),
            bus: self.clone(),
            rx,
        }
    }
}

/// An engine's endpoint on the bus.
pub struct Mailbox {
    id: usize,
    name: String,
    bus: Arc<Bus>,
    rx: Receiver<Event>,
}

impl Mailbox {
    /// Sends `event` to every other subscriber.
    pub fn broadcast(&self, event: Event) {
        self.bus
            .tracer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .trace_event(&self.name, &event);
        let subscribers = self
            .bus
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (id, tx) in subscribers.iter() {
            if *id != self.id {
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Everything received since the last call, in arrival order.
    pub fn recv_all(&self) -> Vec<Event> {
        self.rx.try_iter().collect()
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        self.bus
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(id, _)| *id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        term::{SVar, Type},
        tracer::channel_tracer,
    };

    #[test]
    fn fact_kinds() {
        let x = SVar::new("bus_kind", "x", Type::Int);
        let one = Term::le(&x.at(0), &Term::int(3));
        let two = Term::le(&x.at(0), &x.at(1));
        assert_eq!(FactKind::of(&one), FactKind::OneState);
        assert_eq!(FactKind::of(&Term::bool(true)), FactKind::OneState);
        assert_eq!(FactKind::of(&two), FactKind::TwoState);
    }

    #[test]
    fn broadcast_reaches_others_only() {
        let bus = Bus::new();
        let (tx, rx) = channel_tracer();
        bus.add_tracer(Box::new(tx));
        let a = bus.mailbox("a");
        let b = bus.mailbox("b");
        let c = bus.mailbox("c");
        a.broadcast(Event::Status {
            prop: "p".into(),
            status: PropStatus::KTrue(0),
        });
        assert!(a.recv_all().is_empty());
        assert_eq!(b.recv_all().len(), 1);
        assert_eq!(c.recv_all().len(), 1);
        drop(c);
        b.broadcast(Event::Status {
            prop: "p".into(),
            status: PropStatus::Invariant,
        });
        assert_eq!(a.recv_all().len(), 1);
        let traced: Vec<_> = rx.try_iter().map(|(from, _)| from).collect();
        assert_eq!(traced, ["a", "b"]);
    }
}
