use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinError};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::board::{Report, StatusBoard};
use crate::config::{CheckSpec, IndicatorSpec, Plan, ReportSpec, Settings};
use crate::display::Screen;
use crate::error::LoopError;
use crate::models::{CheckResult, Color, Coordinate, Status};
use crate::probe::{Probe, Prober};

fn paint(screen: &dyn Screen, task: &str, at: Coordinate, color: Color) -> Result<(), LoopError> {
    screen
        .set_pixel(at, color)
        .map_err(|source| LoopError::Display { task: task.to_string(), source })
}

/// Probes one host forever and owns its board key and pixel.
pub struct CheckLoop<P> {
    name: String,
    spec: CheckSpec,
    prober: Arc<P>,
    board: StatusBoard,
    screen: Arc<dyn Screen>,
    pre_probe_delay: Duration,
}

impl<P: Prober> CheckLoop<P> {
    pub fn new(
        spec: CheckSpec,
        prober: Arc<P>,
        board: StatusBoard,
        screen: Arc<dyn Screen>,
        pre_probe_delay: Duration,
    ) -> Self {
        let name = format!("check {} {} at {}", spec.method, spec.target, spec.at);
        Self { name, spec, prober, board, screen, pre_probe_delay }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// One Pending -> Probing -> Settled pass. Returns the settled result.
    pub async fn cycle(&self) -> Result<CheckResult, LoopError> {
        let spec = &self.spec;
        paint(self.screen.as_ref(), &self.name, spec.at, Color::PENDING)?;
        tokio::time::sleep(self.pre_probe_delay).await;

        let started = Instant::now();
        let attempt = self.prober.probe(spec.method, &spec.target);
        let probe = match tokio::time::timeout(spec.interval, attempt).await {
            Ok(probe) => probe,
            Err(_) => Probe::down(format!("probe timed out after {}s", spec.interval.as_secs())),
        };
        let latency = started.elapsed();

        let result = CheckResult {
            status: Status::from(probe.up),
            method: spec.method,
            target: spec.target.clone(),
            timestamp: chrono::Utc::now(),
            latency_ms: probe.up.then(|| latency.as_secs_f64() * 1000.0),
            detail: Some(probe.detail).filter(|d| !d.is_empty()),
        };

        self.board.record(spec.at, result.clone()).await;
        paint(self.screen.as_ref(), &self.name, spec.at, result.status.color())?;

        info!(
            method = %spec.method,
            host = %spec.target,
            at = %spec.at,
            detail = result.detail.as_deref().unwrap_or(""),
            "{} {}: {}",
            spec.method,
            spec.target,
            if result.is_up() { "Success" } else { "Failure" }
        );
        debug!(host = %spec.target, status = ?result.status, "Host check result");

        Ok(result)
    }

    pub async fn run(self) -> Result<(), LoopError> {
        info!(
            host = %self.spec.target,
            at = %self.spec.at,
            method = %self.spec.method,
            interval_s = self.spec.interval.as_secs(),
            "Starting check loop"
        );
        let rest = self.spec.interval.saturating_sub(self.pre_probe_delay);
        loop {
            self.cycle().await?;
            tokio::time::sleep(rest).await;
        }
    }
}

/// Blinks one pixel between two colors. Never touches the board.
pub struct IndicatorLoop {
    name: String,
    spec: IndicatorSpec,
    screen: Arc<dyn Screen>,
}

impl IndicatorLoop {
    pub fn new(spec: IndicatorSpec, screen: Arc<dyn Screen>) -> Self {
        let name = format!("indicator at {}", spec.at);
        Self { name, spec, screen }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(self) -> Result<(), LoopError> {
        let spec = &self.spec;
        info!(
            at = %spec.at,
            color = ?spec.on_color,
            on_s = spec.on.as_secs(),
            off_s = spec.off.as_secs(),
            "Starting blink loop"
        );
        loop {
            paint(self.screen.as_ref(), &self.name, spec.at, spec.on_color)?;
            tokio::time::sleep(spec.on).await;
            paint(self.screen.as_ref(), &self.name, spec.at, spec.off_color)?;
            tokio::time::sleep(spec.off).await;
        }
    }
}

/// Periodically scrolls the fleet summary.
pub struct ReportLoop {
    spec: ReportSpec,
    board: StatusBoard,
    screen: Arc<dyn Screen>,
    scroll_speed: f32,
}

impl ReportLoop {
    pub const NAME: &'static str = "report";

    pub fn new(
        spec: ReportSpec,
        board: StatusBoard,
        screen: Arc<dyn Screen>,
        scroll_speed: f32,
    ) -> Self {
        Self { spec, board, screen, scroll_speed }
    }

    /// Tallies the board and renders the summary. Rendering runs on the blocking pool.
    pub async fn tick(&self) -> Result<Report, LoopError> {
        let report = self.board.report().await;
        let message = report.message();
        let color = report.color();
        info!(up = report.up, down = report.down, total = report.total, "Report: {}", message);

        let screen = Arc::clone(&self.screen);
        let speed = self.scroll_speed;
        tokio::task::spawn_blocking(move || screen.show_message(&message, color, speed))
            .await
            .map_err(|source| LoopError::Render { task: Self::NAME.into(), source })?
            .map_err(|source| LoopError::Display { task: Self::NAME.into(), source })?;

        Ok(report)
    }

    pub async fn run(self) -> Result<(), LoopError> {
        info!(
            at = %self.spec.at,
            interval_s = self.spec.interval.as_secs(),
            "Starting report loop"
        );
        // Start-to-start cadence; a render longer than the interval delays the next tick.
        let mut ticker = tokio::time::interval(self.spec.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.tick().await?;
        }
    }
}

type Outcome = (String, Result<Result<(), LoopError>, JoinError>);

/// Spawned loops. Dropping the group aborts every member.
#[derive(Default)]
struct TaskGroup {
    running: FuturesUnordered<BoxFuture<'static, Outcome>>,
    aborts: Vec<AbortHandle>,
}

impl TaskGroup {
    fn spawn<F>(&mut self, name: String, fut: F)
    where
        F: Future<Output = Result<(), LoopError>> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        self.aborts.push(handle.abort_handle());
        self.running.push(async move { (name, handle.await) }.boxed());
    }

    fn len(&self) -> usize {
        self.running.len()
    }

    /// Waits for the first member to finish. Every loop is infinite, so any
    /// completion is a failure.
    async fn join_first(mut self) -> Result<(), LoopError> {
        match self.running.next().await {
            None => Ok(()),
            Some((task, Ok(Ok(())))) => Err(LoopError::Exited { task }),
            Some((_, Ok(Err(e)))) => Err(e),
            Some((task, Err(source))) => Err(LoopError::Panicked { task, source }),
        }
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        for handle in &self.aborts {
            handle.abort();
        }
    }
}

/// Starts every loop of a [`Plan`] and fails fast on the first loop error.
pub struct Monitor<P> {
    plan: Plan,
    prober: Arc<P>,
    board: StatusBoard,
    screen: Arc<dyn Screen>,
    pre_probe_delay: Duration,
    scroll_speed: f32,
}

impl<P: Prober> Monitor<P> {
    pub fn new(plan: Plan, settings: &Settings, prober: Arc<P>, screen: Arc<dyn Screen>) -> Self {
        Self {
            plan,
            prober,
            board: StatusBoard::new(),
            screen,
            pre_probe_delay: settings.pre_probe_delay(),
            scroll_speed: settings.scroll_speed,
        }
    }

    pub fn board(&self) -> StatusBoard {
        self.board.clone()
    }

    /// Runs until a loop fails. Never returns `Ok` while loops are running.
    pub async fn run(self) -> Result<(), LoopError> {
        let Monitor { plan, prober, board, screen, pre_probe_delay, scroll_speed } = self;

        for pixel in &plan.pixels {
            paint(screen.as_ref(), "static pixels", pixel.at, pixel.color)?;
        }

        let mut group = TaskGroup::default();
        for spec in plan.checks {
            let check = CheckLoop::new(
                spec,
                Arc::clone(&prober),
                board.clone(),
                Arc::clone(&screen),
                pre_probe_delay,
            );
            group.spawn(check.name().to_string(), check.run());
        }
        for spec in plan.indicators {
            let blink = IndicatorLoop::new(spec, Arc::clone(&screen));
            group.spawn(blink.name().to_string(), blink.run());
        }
        let report = ReportLoop::new(plan.report, board, screen, scroll_speed);
        group.spawn(ReportLoop::NAME.to_string(), report.run());

        info!(loops = group.len(), static_pixels = plan.pixels.len(), "All tasks started");

        let result = group.join_first().await;
        if let Err(e) = &result {
            error!(task = e.task(), error = %e, "Loop failed, stopping all loops");
        } else {
            warn!("No loops were running");
        }
        result
    }
}

/// Runs `fut` on a fresh multi-thread runtime, then gives blocking work
/// (a message still scrolling) at most `grace` to finish before returning.
pub fn block_on_with_grace<F: Future>(fut: F, grace: Duration) -> std::io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let output = runtime.block_on(fut);
    runtime.shutdown_timeout(grace);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticPixel;
    use crate::display::FrameBuffer;
    use crate::error::DisplayError;
    use crate::models::CheckMethod;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Scripted {
        up: HashMap<String, bool>,
        delay: Duration,
        calls: Mutex<Vec<(String, Instant)>>,
    }

    impl Scripted {
        fn new(hosts: &[(&str, bool)]) -> Self {
            Self {
                up: hosts.iter().map(|(h, up)| (h.to_string(), *up)).collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<(String, Instant)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Prober for Scripted {
        async fn probe(&self, _method: CheckMethod, target: &str) -> Probe {
            if target == "panic" {
                panic!("scripted prober asked to panic");
            }
            self.calls.lock().unwrap().push((target.to_string(), Instant::now()));
            tokio::time::sleep(self.delay).await;
            if self.up.get(target).copied().unwrap_or(false) {
                Probe::up("ok")
            } else {
                Probe::down(format!("{target} unreachable"))
            }
        }
    }

    /// Frame buffer that refuses writes to one coordinate.
    struct BrokenCell {
        frame: FrameBuffer,
        broken: Coordinate,
    }

    impl Screen for BrokenCell {
        fn set_pixel(&self, at: Coordinate, color: Color) -> Result<(), DisplayError> {
            if at == self.broken {
                return Err(DisplayError::Io(std::io::Error::other("panel disconnected")));
            }
            self.frame.set_pixel(at, color)
        }

        fn show_message(&self, text: &str, color: Color, speed: f32) -> Result<(), DisplayError> {
            self.frame.show_message(text, color, speed)
        }
    }

    fn check(x: u8, target: &str, interval: u64) -> CheckSpec {
        CheckSpec {
            at: Coordinate::new(x, 1),
            method: CheckMethod::Ping,
            target: target.to_string(),
            interval: Duration::from_secs(interval),
        }
    }

    fn plan(checks: Vec<CheckSpec>, indicators: Vec<IndicatorSpec>, report_every: u64) -> Plan {
        Plan {
            checks,
            indicators,
            pixels: Vec::new(),
            report: ReportSpec {
                at: Coordinate::new(8, 8),
                interval: Duration::from_secs(report_every),
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn check_loop_is_pending_until_first_probe_settles() {
        let fb = Arc::new(FrameBuffer::new(8, 8));
        let board = StatusBoard::new();
        let prober = Arc::new(Scripted::new(&[("a", true)]));
        let spec = check(1, "a", 5);
        let at = spec.at;
        let check = CheckLoop::new(spec, prober, board.clone(), fb.clone(), Duration::from_secs(1));
        let handle = tokio::spawn(check.run());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fb.pixel(at), Some(Color::PENDING));
        assert!(board.get(at).await.is_none());
        assert_eq!(board.report().await.total, 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fb.pixel(at), Some(Color::SUCCESS));
        assert_eq!(board.get(at).await.map(|r| r.status), Some(Status::Up));

        let colors: Vec<_> = fb.writes_at(at).iter().map(|w| w.color).collect();
        assert_eq!(colors, vec![Color::PENDING, Color::SUCCESS]);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_is_recorded_as_down_and_counted() {
        let fb = Arc::new(FrameBuffer::new(8, 8));
        let board = StatusBoard::new();
        let prober = Arc::new(Scripted::new(&[]));
        let check = CheckLoop::new(
            check(2, "gone", 5),
            prober,
            board.clone(),
            fb.clone(),
            Duration::from_secs(1),
        );

        let result = check.cycle().await.unwrap();
        assert_eq!(result.status, Status::Down);
        assert_eq!(result.detail.as_deref(), Some("gone unreachable"));
        assert_eq!(result.latency_ms, None);
        assert_eq!(fb.pixel(Coordinate::new(2, 1)), Some(Color::FAILURE));
        assert_eq!(board.report().await, Report { up: 0, down: 1, total: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn slow_probe_times_out_at_interval() {
        let fb = Arc::new(FrameBuffer::new(8, 8));
        let prober = Scripted {
            delay: Duration::from_secs(30),
            ..Scripted::new(&[("slow", true)])
        };
        let check = CheckLoop::new(
            check(1, "slow", 5),
            Arc::new(prober),
            StatusBoard::new(),
            fb,
            Duration::from_secs(1),
        );

        let started = Instant::now();
        let result = check.cycle().await.unwrap();
        assert_eq!(result.status, Status::Down);
        assert_eq!(result.detail.as_deref(), Some("probe timed out after 5s"));
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn probes_follow_the_interval() {
        let fb = Arc::new(FrameBuffer::new(8, 8));
        let prober = Arc::new(Scripted::new(&[("a", true)]));
        let check = CheckLoop::new(
            check(1, "a", 5),
            prober.clone(),
            StatusBoard::new(),
            fb,
            Duration::from_secs(1),
        );

        let start = Instant::now();
        let handle = tokio::spawn(check.run());
        tokio::time::sleep(Duration::from_secs(12)).await;
        handle.abort();

        let offsets: Vec<_> = prober
            .calls()
            .iter()
            .map(|(_, at)| at.duration_since(start).as_secs())
            .collect();
        assert_eq!(offsets, vec![1, 6, 11]);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_shorter_than_pre_probe_delay_does_not_underflow() {
        let fb = Arc::new(FrameBuffer::new(8, 8));
        let prober = Arc::new(Scripted::new(&[("a", true)]));
        let check = CheckLoop::new(
            check(1, "a", 1),
            prober.clone(),
            StatusBoard::new(),
            fb,
            Duration::from_secs(2),
        );

        let handle = tokio::spawn(check.run());
        tokio::time::sleep(Duration::from_millis(4500)).await;
        handle.abort();
        assert_eq!(prober.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn indicator_toggles_on_its_own_timers() {
        let fb = Arc::new(FrameBuffer::new(8, 8));
        let at = Coordinate::new(4, 4);
        let blink = IndicatorLoop::new(
            IndicatorSpec {
                at,
                on_color: Color(0, 0, 255),
                off_color: Color::OFF,
                on: Duration::from_secs(1),
                off: Duration::from_secs(2),
            },
            fb.clone(),
        );

        let start = Instant::now();
        let handle = tokio::spawn(blink.run());
        tokio::time::sleep(Duration::from_millis(6500)).await;
        handle.abort();

        let writes: Vec<_> = fb
            .writes_at(at)
            .iter()
            .map(|w| (w.when.duration_since(start).as_secs(), w.color))
            .collect();
        assert_eq!(
            writes,
            vec![
                (0, Color(0, 0, 255)),
                (1, Color::OFF),
                (3, Color(0, 0, 255)),
                (4, Color::OFF),
                (6, Color(0, 0, 255)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn report_loop_renders_on_start_and_each_interval() {
        let fb = Arc::new(FrameBuffer::new(8, 8));
        let board = StatusBoard::new();
        let spec = ReportSpec { at: Coordinate::new(1, 1), interval: Duration::from_secs(10) };
        let report = ReportLoop::new(spec, board, fb.clone(), 0.05);

        let handle = tokio::spawn(report.run());
        tokio::time::sleep(Duration::from_secs(25)).await;
        handle.abort();

        let messages = fb.messages();
        assert_eq!(messages.len(), 3);
        assert!(messages
            .iter()
            .all(|m| m.text == "0/0 UP 0/0 DOWN" && m.color == Color::FAILURE));
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_paints_static_pixels_first() {
        let fb = Arc::new(FrameBuffer::new(8, 8));
        let mut p = plan(vec![], vec![], 10);
        p.pixels.push(StaticPixel { at: Coordinate::new(5, 5), color: Color::SUCCESS });
        let prober = Arc::new(Scripted::default());
        let monitor = Monitor::new(p, &Settings::default(), prober, fb.clone());

        let handle = tokio::spawn(monitor.run());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fb.pixel(Coordinate::new(5, 5)), Some(Color::SUCCESS));
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn display_failure_stops_every_loop() {
        let broken = Coordinate::new(2, 1);
        let screen = Arc::new(BrokenCell { frame: FrameBuffer::new(8, 8), broken });
        let prober = Arc::new(Scripted::new(&[("a", true), ("b", true)]));
        let p = plan(vec![check(1, "a", 5), check(2, "b", 5)], vec![], 10);
        let monitor = Monitor::new(p, &Settings::default(), prober.clone(), screen);

        let err = monitor.run().await.unwrap_err();
        assert!(matches!(err, LoopError::Display { .. }));
        assert_eq!(err.task(), "check ping b at (2, 1)");

        // The healthy loop was aborted along with the group.
        let probes_at_failure = prober.calls().len();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(prober.calls().len(), probes_at_failure);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_loop_is_reported_by_name() {
        let fb = Arc::new(FrameBuffer::new(8, 8));
        let p = plan(vec![check(3, "panic", 5)], vec![], 10);
        let monitor = Monitor::new(p, &Settings::default(), Arc::new(Scripted::default()), fb);

        let err = monitor.run().await.unwrap_err();
        assert!(matches!(err, LoopError::Panicked { .. }));
        assert_eq!(err.task(), "check ping panic at (3, 1)");
    }

    #[test]
    fn shutdown_does_not_wait_for_a_running_render() {
        let started = std::time::Instant::now();
        let rendered = block_on_with_grace(
            async {
                // Stands in for a message still scrolling when Ctrl-C arrives.
                tokio::task::spawn_blocking(|| std::thread::sleep(Duration::from_secs(5)));
                tokio::time::sleep(Duration::from_millis(10)).await;
                "done"
            },
            Duration::from_millis(100),
        )
        .unwrap();

        assert_eq!(rendered, "done");
        assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
    }
}
