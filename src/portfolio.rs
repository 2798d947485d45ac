//! Runs the selected engines concurrently on one system.

use crate::{
    Engine, EngineCtrl, EngineError,
    bmc::Bmc,
    bus::Bus,
    config::{self, Config},
    invgen::{BoolDom, IntDom, InvGen},
    kind::Kind,
    store::Store,
    tracer::{LogTracer, TracerIf},
    transys::{TransSys, property::PropStatus},
};
use log::{debug, error, info};
use std::{
    sync::{
        Arc,
        mpsc::{self, TryRecvError},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

struct Done {
    engine: &'static str,
    result: Result<(), EngineError>,
}

#[derive(Debug, Default)]
pub struct Statistic {
    pub num_engines: usize,
    pub num_failed: usize,
    pub time: Duration,
}

pub struct Portfolio {
    cfg: Config,
    ts: Arc<TransSys>,
    store: Store,
    bus: Arc<Bus>,
    ctrl: EngineCtrl,
    statistic: Statistic,
}

impl Portfolio {
    pub fn new(cfg: Config, ts: Arc<TransSys>) -> Self {
        let store = Store::new(&ts.props);
        let bus = Bus::new();
        bus.add_tracer(Box::new(LogTracer::new()));
        Self {
            cfg,
            ts,
            store,
            bus,
            ctrl: EngineCtrl::default(),
            statistic: Statistic::default(),
        }
    }

    #[inline]
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn add_tracer(&mut self, tracer: Box<dyn TracerIf>) {
        self.bus.add_tracer(tracer);
    }

    fn engine(&self, e: config::Engine) -> Box<dyn Engine> {
        let cfg = self.cfg.clone();
        let ts = self.ts.clone();
        let store = self.store.clone();
        match e {
            config::Engine::Bmc => Box::new(Bmc::new(cfg, ts, store, self.bus.mailbox("bmc"))),
            config::Engine::Kind => Box::new(Kind::new(cfg, ts, store, self.bus.mailbox("kind"))),
            config::Engine::InvgenBool => Box::new(InvGen::<BoolDom>::new(
                cfg,
                ts,
                store,
                self.bus.mailbox("invgen-bool"),
            )),
            config::Engine::InvgenInt => Box::new(InvGen::<IntDom>::new(
                cfg,
                ts,
                store,
                self.bus.mailbox("invgen-int"),
            )),
        }
    }

    fn spawn(
        &self,
        mut engine: Box<dyn Engine>,
        tx: mpsc::Sender<Done>,
    ) -> (JoinHandle<()>, EngineCtrl) {
        let ctrl = engine.get_ctrl();
        let handle = thread::spawn(move || {
            let result = engine.check();
            engine.on_exit();
            let _ = tx.send(Done {
                engine: engine.name(),
                result,
            });
        });
        (handle, ctrl)
    }

    /// Final status of every property.
    pub fn statuses(&self) -> Vec<(String, PropStatus)> {
        self.store.statuses()
    }

    fn run(&mut self) {
        let start = Instant::now();
        let engines = self.cfg.engine_set();
        let (tx, rx) = mpsc::channel::<Done>();
        let mut joins = Vec::new();
        let mut ctrls = Vec::new();
        let mut deciding = 0;
        for e in engines {
            if matches!(e, config::Engine::Bmc | config::Engine::Kind) {
                deciding += 1;
            }
            let (j, c) = self.spawn(self.engine(e), tx.clone());
            joins.push(j);
            ctrls.push(c);
        }
        self.statistic.num_engines = joins.len();
        let limit = self.cfg.time_limit.map(Duration::from_secs);
        let mut running = joins.len();
        while running > 0 {
            if self.ctrl.is_terminated() {
                info!("termination requested");
                break;
            }
            if limit.is_some_and(|l| start.elapsed() > l) {
                info!("time limit reached");
                break;
            }
            if self.store.all_resolved() {
                debug!("every property is resolved");
                break;
            }
            let done = match rx.try_recv() {
                Ok(done) => done,
                Err(TryRecvError::Empty) => {
                    thread::sleep(Duration::from_millis(10));
                    continue;
                }
                Err(TryRecvError::Disconnected) => break,
            };
            running -= 1;
            match done.result {
                Ok(()) => debug!("{} finished", done.engine),
                Err(e) if e.is_terminated() => debug!("{} terminated", done.engine),
                Err(e) => {
                    error!("{} failed: {e}", done.engine);
                    self.statistic.num_failed += 1;
                    // the step engine waits on the base engine
                    if done.engine == "bmc" {
                        break;
                    }
                }
            }
            if matches!(done.engine, "bmc" | "kind") {
                deciding -= 1;
                if deciding == 0 {
                    debug!("no engine left to decide properties");
                    break;
                }
            }
        }
        for c in ctrls.iter() {
            c.terminate();
        }
        drop(tx);
        for j in joins {
            if j.join().is_err() {
                error!("an engine thread panicked");
            }
        }
        self.statistic.time = start.elapsed();
    }
}

impl Engine for Portfolio {
    fn name(&self) -> &'static str {
        "portfolio"
    }

    fn check(&mut self) -> Result<(), EngineError> {
        self.run();
        Ok(())
    }

    fn statistic(&mut self) {
        info!("portfolio statistic: {:#?}", self.statistic);
    }

    fn get_ctrl(&self) -> EngineCtrl {
        self.ctrl.clone()
    }
}
