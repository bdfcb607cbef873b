use chrono::Local;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::session::{SessionEvent, SessionState, SessionStateMachine};
use super::{MarketDataSource, SourceError, TickHandler};
use crate::models::{MarketSnapshot, PriceLevel, DEPTH_LEVELS};

/// Settings for the simulated vendor feed
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub instruments: Vec<String>,
    /// Total ticks per second across all instruments
    pub ticks_per_second: u32,
    /// Fixed seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            instruments: vec![
                "rb2510".to_string(),
                "cu2509".to_string(),
                "au2512".to_string(),
                "IF2509".to_string(),
            ],
            ticks_per_second: 200,
            seed: None,
        }
    }
}

impl SimulatorConfig {
    pub fn with_env_config() -> Self {
        let defaults = Self::default();
        let instruments = std::env::var("SIM_INSTRUMENTS")
            .ok()
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|list| !list.is_empty())
            .unwrap_or(defaults.instruments);

        Self {
            instruments,
            ticks_per_second: std::env::var("SIM_TICKS_PER_SECOND")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.ticks_per_second),
            seed: std::env::var("SIM_SEED").ok().and_then(|v| v.parse().ok()),
        }
    }
}

/// Random-walk market data source
///
/// Walks the session state machine the way a real vendor login would, then
/// calls the handler from its own thread at the configured rate.
pub struct SimulatedSource {
    config: SimulatorConfig,
    session: Arc<SessionStateMachine>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SimulatedSource {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            session: Arc::new(SessionStateMachine::new()),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn session(&self) -> &Arc<SessionStateMachine> {
        &self.session
    }

    /// Stop emitting ticks and wait for the feed thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("❌ Simulated feed thread panicked");
            }
        }
    }

    fn login(&self) -> Result<(), SourceError> {
        self.session.apply(SessionEvent::Connected)?;
        self.session.apply(SessionEvent::LoginSucceeded)?;
        self.session.apply(SessionEvent::InstrumentsLoaded)?;
        self.session.apply(SessionEvent::SubscribeRequested)?;
        self.session.apply(SessionEvent::SubscribeAcknowledged)?;
        Ok(())
    }
}

impl MarketDataSource for SimulatedSource {
    fn subscribe(&mut self, handler: TickHandler) -> Result<(), SourceError> {
        if self.worker.is_some() {
            return Err(SourceError::AlreadySubscribed);
        }
        if self.config.instruments.is_empty() {
            return Err(SourceError::NoInstruments);
        }

        self.login()?;

        self.running.store(true, Ordering::Release);
        let feed = Feed::new(&self.config);
        let running = Arc::clone(&self.running);
        let session = Arc::clone(&self.session);

        let worker = std::thread::Builder::new()
            .name("simulated-feed".to_string())
            .spawn(move || feed.run(handler, running, session))?;
        self.worker = Some(worker);

        tracing::info!(
            instruments = ?self.config.instruments,
            ticks_per_second = self.config.ticks_per_second,
            "✅ Simulated market data streaming"
        );
        Ok(())
    }
}

impl Drop for SimulatedSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Per-instrument random walk state
struct Walk {
    instrument_id: String,
    tick_size: f64,
    pre_settlement: f64,
    open: f64,
    last: f64,
    high: f64,
    low: f64,
    volume: i32,
    turnover: f64,
    open_interest: f64,
}

impl Walk {
    fn new(instrument_id: String, rng: &mut StdRng) -> Self {
        let base = rng.random_range(1_000.0..8_000.0_f64).round();
        Self {
            instrument_id,
            tick_size: 1.0,
            pre_settlement: base,
            open: base,
            last: base,
            high: base,
            low: base,
            volume: 0,
            turnover: 0.0,
            open_interest: rng.random_range(50_000.0..500_000.0_f64).round(),
        }
    }

    fn step(&mut self, rng: &mut StdRng) -> MarketSnapshot {
        let moves: i32 = rng.random_range(-2..=2);
        self.last = (self.last + moves as f64 * self.tick_size).max(self.tick_size);
        self.high = self.high.max(self.last);
        self.low = self.low.min(self.last);

        let traded: i32 = rng.random_range(1..=20);
        self.volume = self.volume.saturating_add(traded);
        self.turnover += traded as f64 * self.last;
        if rng.random_bool(0.5) {
            self.open_interest += traded as f64;
        } else {
            self.open_interest = (self.open_interest - traded as f64).max(0.0);
        }

        let mut levels = [PriceLevel::default(); DEPTH_LEVELS];
        for (i, level) in levels.iter_mut().enumerate() {
            let offset = (i as f64 + 1.0) * self.tick_size;
            level.bid_price = self.last - offset;
            level.bid_volume = rng.random_range(1..=200);
            level.ask_price = self.last + offset;
            level.ask_volume = rng.random_range(1..=200);
        }

        let now = Local::now();
        let day = now.format("%Y%m%d").to_string();
        MarketSnapshot {
            trading_day: day.clone(),
            instrument_id: self.instrument_id.clone(),
            exchange_id: "SIM".to_string(),
            exchange_inst_id: self.instrument_id.clone(),
            last_price: self.last,
            pre_settlement_price: self.pre_settlement,
            pre_close_price: self.pre_settlement,
            pre_open_interest: self.open_interest,
            open_price: self.open,
            highest_price: self.high,
            lowest_price: self.low,
            volume: self.volume,
            turnover: self.turnover,
            open_interest: self.open_interest,
            close_price: 0.0,
            settlement_price: 0.0,
            upper_limit_price: (self.pre_settlement * 1.1).round(),
            lower_limit_price: (self.pre_settlement * 0.9).round(),
            pre_delta: 0.0,
            curr_delta: 0.0,
            update_time: now.format("%H:%M:%S").to_string(),
            update_millisec: now.timestamp_subsec_millis() as i32,
            levels,
            average_price: if self.volume > 0 {
                self.turnover / self.volume as f64
            } else {
                0.0
            },
            action_day: day,
        }
    }
}

struct Feed {
    walks: Vec<Walk>,
    rng: StdRng,
    interval: Duration,
}

impl Feed {
    fn new(config: &SimulatorConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed.unwrap_or_else(rand::random));
        let walks = config
            .instruments
            .iter()
            .map(|id| Walk::new(id.clone(), &mut rng))
            .collect();

        Self {
            walks,
            rng,
            interval: Duration::from_secs(1) / config.ticks_per_second.max(1),
        }
    }

    fn run(mut self, mut handler: TickHandler, running: Arc<AtomicBool>, session: Arc<SessionStateMachine>) {
        let mut next = Instant::now();
        let mut index = 0usize;

        while running.load(Ordering::Acquire) {
            let slot = index % self.walks.len();
            let walk = &mut self.walks[slot];
            handler(walk.step(&mut self.rng));
            index = index.wrapping_add(1);

            next += self.interval;
            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
            } else {
                // Fell behind; do not try to catch up in a burst
                next = now;
            }
        }

        if session.state() != SessionState::Disconnected {
            let _ = session.apply(SessionEvent::Disconnected);
        }
        tracing::info!(ticks = index, "Simulated feed stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn fast_config() -> SimulatorConfig {
        SimulatorConfig {
            instruments: vec!["rb2510".to_string(), "cu2509".to_string()],
            ticks_per_second: 2_000,
            seed: Some(7),
        }
    }

    #[test]
    fn test_subscribe_streams_to_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut source = SimulatedSource::new(fast_config());

        let sink = Arc::clone(&seen);
        source
            .subscribe(Box::new(move |snapshot: MarketSnapshot| {
                sink.lock().push(snapshot);
            }))
            .unwrap();
        assert_eq!(source.session().state(), SessionState::Streaming);

        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().len() < 20 {
            assert!(Instant::now() < deadline, "feed produced too few ticks");
            std::thread::sleep(Duration::from_millis(5));
        }
        source.stop();
        assert_eq!(source.session().state(), SessionState::Disconnected);

        let ticks = seen.lock();
        assert!(ticks.iter().any(|t| t.instrument_id == "rb2510"));
        assert!(ticks.iter().any(|t| t.instrument_id == "cu2509"));
        for tick in ticks.iter() {
            let top = tick.top_of_book();
            assert!(top.bid_price < tick.last_price);
            assert!(top.ask_price > tick.last_price);
            assert!(tick.lowest_price <= tick.last_price && tick.last_price <= tick.highest_price);
        }
    }

    #[test]
    fn test_instruments_are_visited_round_robin() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut source = SimulatedSource::new(SimulatorConfig {
            instruments: vec!["rb2510".to_string(), "cu2509".to_string(), "au2512".to_string()],
            ..fast_config()
        });

        let sink = Arc::clone(&seen);
        source
            .subscribe(Box::new(move |snapshot: MarketSnapshot| {
                sink.lock().push(snapshot.instrument_id);
            }))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().len() < 7 {
            assert!(Instant::now() < deadline, "feed produced too few ticks");
            std::thread::sleep(Duration::from_millis(5));
        }
        source.stop();

        let ids = seen.lock();
        assert_eq!(
            &ids[..7],
            ["rb2510", "cu2509", "au2512", "rb2510", "cu2509", "au2512", "rb2510"]
        );
    }

    #[test]
    fn test_second_subscribe_is_rejected() {
        let mut source = SimulatedSource::new(fast_config());
        source.subscribe(Box::new(|_: MarketSnapshot| {})).unwrap();

        assert!(matches!(
            source.subscribe(Box::new(|_: MarketSnapshot| {})),
            Err(SourceError::AlreadySubscribed)
        ));
    }

    #[test]
    fn test_empty_instrument_list_is_rejected() {
        let mut source = SimulatedSource::new(SimulatorConfig {
            instruments: Vec::new(),
            ..fast_config()
        });

        assert!(matches!(
            source.subscribe(Box::new(|_: MarketSnapshot| {})),
            Err(SourceError::NoInstruments)
        ));
        assert_eq!(source.session().state(), SessionState::Disconnected);
    }
}
