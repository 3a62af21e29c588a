/// The architecture of this runner keeps every concern in its own task and
/// moves data through bounded channels. Below we detail the key decisions.
///
/// We assume:
/// - S connected sessions (typically one)
/// - D devices in a run request
///
/// 1. Each client connection is served by one session task that owns the
/// socket. Inbound command frames are decoded and handed to the controller;
/// outbound frames are produced on the session's bounded sink channel and
/// written back out by the same task. A client that stops reading therefore
/// stalls the whole pipeline through that bounded channel, which is the
/// intended backpressure.
///
/// 2. The controller is the only owner of run state. A start command installs
/// the active run (a pause predicate plus a one-shot cancel signal) and
/// spawns the run driver; pause, resume and stop only flip those signals.
/// Further starts are ignored until the run's terminal frame is out.
///
/// 3. The run driver spawns one worker per device. Workers iterate their
/// channel list in request order, block while paused, observe cancellation
/// between measurements, and emit one result per channel onto the results
/// channel (bounded at one slot per requested channel).
///
/// 4. The batcher is the single consumer of the results channel and the
/// single producer of streaming frames: it flushes on a full batch or on a
/// timer tick, and owns the canonical buffer of everything it streamed. When
/// the fleet closes the channel, the final batch goes out as the streaming
/// `completed` frame.
///
/// 5. Persistence runs strictly after streaming: header first (minting the
/// run id), then every buffered result under a write semaphore, then the
/// terminal status frame. Only then is the run forgotten and the bench free
/// for the next start.

// This module contains the run controller.
pub mod controller;

// This module contains the runner prelude.
pub mod prelude;

// This module contains the common read-write (+serde) utilities.
pub mod rw;

// This module contains the implementation of channels, sessions, workers, the
// batcher and the persistence pipeline.
pub mod task;

// Re-exports.
pub use controller::RunController;

use crate::config::Config;
use crate::info;
use crate::run::prelude::RunResult;
use crate::run::task::session::{self, Sessions};
use crate::scpi::Gateway;
use crate::store::Store;
use crate::time::RunTime;
use std::sync::Arc;

/// Brings up the instrument pool, then accepts client sessions on the
/// configured port until the process dies. A gateway connection failure
/// aborts boot.
pub async fn serve(config: Config, store: Arc<dyn Store>) -> RunResult<()> {
    let gateway = Arc::new(Gateway::new(config.tcp_nodelay(), config.tcp_buffer_size()));
    gateway
        .connect(config.scpi_host(), config.scpi_port(), config.devices())
        .await?;

    let time = Arc::new(RunTime);
    let controller = RunController::new(config.clone(), gateway, store, time);
    let sessions = Arc::new(Sessions::new());

    let listener = task::listen(("0.0.0.0", config.client_port())).await?;
    info!("[server] listening for clients on port {}", config.client_port());
    let mut incoming = task::spawn_producer(config.channel_buffer_size(), |tx| {
        task::listener_task(listener, config.tcp_nodelay(), config.tcp_buffer_size(), tx)
    });

    while let Some(connection) = incoming.recv().await {
        task::spawn(session::session_task(
            controller.clone(),
            sessions.clone(),
            connection,
            config.channel_buffer_size(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::{ChannelResult, RunStatus};
    use crate::protocol::{Command, HistoryParams, Outbound};
    use crate::run::rw::Connection;
    use crate::scpi::stub::{available_base_port, StubInstrument};
    use crate::store::MemStore;
    use tokio::time::{timeout, Duration};

    struct TestBench {
        client: Connection,
        store: Arc<MemStore>,
    }

    /// Spawns one stub instrument per entry on consecutive ports, boots the
    /// whole engine against them, and connects one client.
    async fn start_bench(stubs: Vec<StubInstrument>) -> TestBench {
        let devices = stubs.len() as u32;
        // scpi stubs at base..base+D-1, the client listener at base+D
        let base_port = available_base_port(devices as u16 + 1);
        for (index, instrument) in stubs.into_iter().enumerate() {
            instrument.spawn(base_port + index as u16).await;
        }
        let client_port = base_port + devices as u16;

        let mut config = Config::new(devices);
        config.set_scpi_host("127.0.0.1");
        config.set_scpi_port(base_port);
        config.set_client_port(client_port);

        let store = Arc::new(MemStore::new(Arc::new(RunTime)));
        let serve_store: Arc<dyn Store> = store.clone();
        task::spawn(async move {
            serve(config, serve_store).await.expect("serve should boot");
        });

        let client = task::connect(("127.0.0.1", client_port), true, 1024, 50)
            .await
            .expect("client should connect");
        TestBench { client, store }
    }

    async fn send_command(client: &mut Connection, command: Command) {
        client.send(&command).await.expect("command should send");
    }

    async fn recv_frame(client: &mut Connection) -> Outbound {
        match timeout(Duration::from_secs(5), client.recv::<Outbound>()).await {
            Ok(Some(Ok(frame))) => frame,
            other => panic!("expected an outbound frame, got {:?}", other),
        }
    }

    /// Drains frames until the streaming `completed` frame, returning every
    /// result streamed.
    async fn collect_streaming(client: &mut Connection) -> Vec<ChannelResult> {
        let mut streamed = Vec::new();
        loop {
            match recv_frame(client).await {
                Outbound::InProgress { results } => streamed.extend(results),
                Outbound::Completed {
                    results: Some(results),
                    message: None,
                } => {
                    streamed.extend(results);
                    return streamed;
                }
                other => panic!("unexpected frame during streaming: {:?}", other),
            }
        }
    }

    /// Expects the persistence tail: a writing frame, then the terminal frame.
    async fn expect_persisted(client: &mut Connection) {
        match recv_frame(client).await {
            Outbound::Writing { .. } => (),
            other => panic!("expected writing frame, got {:?}", other),
        }
        match recv_frame(client).await {
            Outbound::Completed {
                results: None,
                message: Some(_),
            } => (),
            other => panic!("expected terminal frame, got {:?}", other),
        }
    }

    async fn expect_quiet(client: &mut Connection, quiet: Duration) {
        if let Ok(frame) = timeout(quiet, client.recv::<Outbound>()).await {
            panic!("expected no frame, got {:?}", frame);
        }
    }

    #[tokio::test]
    async fn s1_happy_path_streams_persists_and_is_queryable() {
        let mut bench = start_bench(vec![
            StubInstrument::new(vec![7000, 8000, 9000]),
            StubInstrument::new(vec![7000, 8000, 9000]),
        ])
        .await;
        let client = &mut bench.client;

        send_command(
            client,
            Command::Start {
                devices: vec![1, 2],
                channels: vec![1, 2, 3],
            },
        )
        .await;

        let streamed = collect_streaming(client).await;
        assert_eq!(streamed.len(), 6);
        // 7000 lies inside the pass band, so nothing passes
        assert!(streamed.iter().all(|result| !result.passed));
        // per device, channel order preserves the request order
        for device in 1..=2 {
            let channels: Vec<_> = streamed
                .iter()
                .filter(|result| result.device == device)
                .map(|result| result.channel)
                .collect();
            assert_eq!(channels, vec![1, 2, 3]);
        }

        expect_persisted(client).await;
        expect_quiet(client, Duration::from_millis(300)).await;

        // the history query sees the run on top
        send_command(client, Command::GetMeasurementHistory).await;
        let history = match recv_frame(client).await {
            Outbound::MeasurementHistory { history } => history,
            other => panic!("expected history frame, got {:?}", other),
        };
        assert_eq!(history.len(), 1);
        let header = &history[0];
        assert_eq!(header.device_count, 2);
        assert_eq!(header.channel_count, 3);
        assert_eq!(header.status, RunStatus::Completed);
        assert!(header.start_time <= header.end_time);

        // and the samples round trip: 6 channels times 3 samples each
        send_command(
            client,
            Command::GetHistoricalData {
                params: HistoryParams {
                    history_id: header.history_id,
                },
            },
        )
        .await;
        match recv_frame(client).await {
            Outbound::HistoricalData {
                history_id,
                results,
            } => {
                assert_eq!(history_id, header.history_id);
                assert_eq!(results.len(), 18);
                assert!(results.iter().all(|point| point.history_id == history_id));
            }
            other => panic!("expected historical data frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn s3_pause_holds_results_and_resume_releases_them() {
        // slow enough that the pause lands well before the run can finish
        let mut bench = start_bench(vec![
            StubInstrument::new(vec![7000]).with_latency(Duration::from_millis(200)),
        ])
        .await;
        let client = &mut bench.client;

        send_command(
            client,
            Command::Start {
                devices: vec![1],
                channels: vec![1, 2, 3, 4],
            },
        )
        .await;

        // wait for results to start flowing
        let mut streamed = Vec::new();
        while streamed.len() < 2 {
            match recv_frame(client).await {
                Outbound::InProgress { results } => streamed.extend(results),
                other => panic!("unexpected frame {:?}", other),
            }
        }

        send_command(client, Command::Pause).await;
        // the measurement already in flight may still land
        if let Ok(Some(Ok(Outbound::InProgress { results }))) =
            timeout(Duration::from_millis(600), client.recv::<Outbound>()).await
        {
            streamed.extend(results);
        }
        // after that, a paused run is silent
        expect_quiet(client, Duration::from_millis(400)).await;

        // resume releases the remaining channels; the result set matches an
        // uninterrupted run
        send_command(client, Command::Resume).await;
        loop {
            match recv_frame(client).await {
                Outbound::InProgress { results } => streamed.extend(results),
                Outbound::Completed {
                    results: Some(results),
                    message: None,
                } => {
                    streamed.extend(results);
                    break;
                }
                other => panic!("unexpected frame {:?}", other),
            }
        }
        let channels: Vec<_> = streamed.iter().map(|result| result.channel).collect();
        assert_eq!(channels, vec![1, 2, 3, 4]);

        expect_persisted(client).await;
    }

    #[tokio::test]
    async fn s4_stop_cuts_the_run_short_but_persists_what_streamed() {
        let mut bench = start_bench(vec![
            StubInstrument::new(vec![7000, 8000]).with_latency(Duration::from_millis(50)),
        ])
        .await;
        let client = &mut bench.client;

        send_command(
            client,
            Command::Start {
                devices: vec![1],
                channels: (1..=10).collect(),
            },
        )
        .await;

        // stop as soon as the first results show up; a duplicate stop must be
        // a no-op
        let mut streamed = Vec::new();
        match recv_frame(client).await {
            Outbound::InProgress { results } => streamed.extend(results),
            other => panic!("unexpected frame {:?}", other),
        }
        send_command(client, Command::Stop).await;
        send_command(client, Command::Stop).await;

        // streaming wraps up with whatever was in flight
        loop {
            match recv_frame(client).await {
                Outbound::InProgress { results } => streamed.extend(results),
                Outbound::Completed {
                    results: Some(results),
                    message: None,
                } => {
                    streamed.extend(results);
                    break;
                }
                other => panic!("unexpected frame {:?}", other),
            }
        }
        assert!(
            streamed.len() < 10,
            "stop should cut the run short, streamed {}",
            streamed.len()
        );

        // the run is still reported as a normal completion
        expect_persisted(client).await;
        expect_quiet(client, Duration::from_millis(300)).await;

        // everything streamed, and nothing else, was persisted
        let headers = bench.store.list_recent_runs(10).await.expect("query should work");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].status, RunStatus::Aborted);
        let samples = bench
            .store
            .get_samples(headers[0].history_id)
            .await
            .expect("query should work");
        let expected: usize = streamed.iter().map(|result| result.voltages.len()).sum();
        assert_eq!(samples.len(), expected);
    }

    #[tokio::test]
    async fn s5_a_protocol_error_skips_that_channel_only() {
        let mut bench = start_bench(vec![
            StubInstrument::new(vec![7000]).with_faulty_channel(2),
            StubInstrument::new(vec![7000]),
        ])
        .await;
        let client = &mut bench.client;

        send_command(
            client,
            Command::Start {
                devices: vec![1, 2],
                channels: vec![1, 2, 3],
            },
        )
        .await;

        let streamed = collect_streaming(client).await;
        assert_eq!(streamed.len(), 5);
        assert!(!streamed
            .iter()
            .any(|result| result.device == 1 && result.channel == 2));

        // the run still completes, and no error frame is emitted
        expect_persisted(client).await;
        expect_quiet(client, Duration::from_millis(300)).await;
    }

    #[tokio::test]
    async fn a_second_start_is_ignored_while_a_run_is_active() {
        let mut bench = start_bench(vec![
            StubInstrument::new(vec![7000]).with_latency(Duration::from_millis(30)),
        ])
        .await;
        let client = &mut bench.client;

        send_command(
            client,
            Command::Start {
                devices: vec![1],
                channels: vec![1, 2, 3, 4],
            },
        )
        .await;
        // a competing start while the first run is live
        send_command(
            client,
            Command::Start {
                devices: vec![1],
                channels: vec![1],
            },
        )
        .await;

        let streamed = collect_streaming(client).await;
        assert_eq!(streamed.len(), 4);
        expect_persisted(client).await;
        expect_quiet(client, Duration::from_millis(300)).await;

        // only one run was recorded
        let headers = bench.store.list_recent_runs(10).await.expect("query should work");
        assert_eq!(headers.len(), 1);

        // once the bench is free, runs go through again, with increasing ids
        send_command(
            client,
            Command::Start {
                devices: vec![1],
                channels: vec![1],
            },
        )
        .await;
        let streamed = collect_streaming(client).await;
        assert_eq!(streamed.len(), 1);
        expect_persisted(client).await;

        let headers = bench.store.list_recent_runs(10).await.expect("query should work");
        assert_eq!(headers.len(), 2);
        assert!(headers[0].history_id > headers[1].history_id);
    }

    #[tokio::test]
    async fn malformed_frames_are_ignored_and_the_session_survives() {
        let mut bench = start_bench(vec![StubInstrument::new(vec![100000])]).await;
        let client = &mut bench.client;

        client
            .send_raw("this is not json")
            .await
            .expect("raw line should send");
        client
            .send_raw(r#"{"action":"reboot"}"#)
            .await
            .expect("raw line should send");

        send_command(
            client,
            Command::Start {
                devices: vec![1],
                channels: vec![1],
            },
        )
        .await;
        let streamed = collect_streaming(client).await;
        assert_eq!(streamed.len(), 1);
        // 100000 is outside the band
        assert!(streamed[0].passed);
        expect_persisted(client).await;
    }
}
