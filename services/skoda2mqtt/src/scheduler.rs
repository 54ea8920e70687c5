//! Poll loop and task supervision
//!
//! Two long-lived tasks share one `Session`: the poll/publish loop below and
//! the token refresh task from `skoda_session`. Vehicles are polled one after
//! another so a re-authentication never races another request.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use skoda_session::{Session, spawn_refresh_task};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::poller::{PollOutcome, StatusPoller};
use crate::publish::{Publisher, Sink};

/// State owned by the poll task.
pub struct PollLoop {
    session: Arc<Session>,
    sink: Arc<dyn Sink>,
    poller: StatusPoller,
    publisher: Publisher,
    /// `None` until discovery has succeeded once.
    vehicles: Option<Vec<String>>,
    vehicle_data: HashMap<String, Value>,
    vehicle_rights: HashMap<String, Value>,
    request_updates: bool,
}

impl PollLoop {
    pub fn new(
        session: Arc<Session>,
        sink: Arc<dyn Sink>,
        namespace: impl Into<String>,
        request_updates: bool,
    ) -> Self {
        Self {
            session,
            sink,
            poller: StatusPoller::new(),
            publisher: Publisher::new(namespace),
            vehicles: None,
            vehicle_data: HashMap::new(),
            vehicle_rights: HashMap::new(),
            request_updates,
        }
    }

    /// Log in if needed and list the account's vehicles. Carport data,
    /// rights and home region are fetched per VIN; their failures are
    /// logged and otherwise ignored.
    async fn discover(&mut self) -> skoda_session::Result<()> {
        self.session.ensure_authenticated().await?;

        let vins = match self.session.list_vehicles().await {
            Ok(vins) => vins,
            Err(e) => {
                if e.is_unauthorized() {
                    self.session.clear_tokens().await;
                }
                return Err(e);
            }
        };

        for vin in &vins {
            match self.session.vehicle_data(vin).await {
                Ok(data) => {
                    let model = data.pointer("/carportData/modelName").and_then(Value::as_str);
                    if let Some(model) = model {
                        info!(vin = %vin, model, "vehicle discovered");
                    }
                    self.vehicle_data.insert(vin.clone(), data);
                }
                Err(e) => debug!(vin = %vin, error = %e, "carport data unavailable"),
            }
            match self.session.vehicle_rights(vin).await {
                Ok(rights) => {
                    self.vehicle_rights.insert(vin.clone(), rights);
                }
                Err(e) => debug!(vin = %vin, error = %e, "operation rights unavailable"),
            }
            if let Err(e) = self.session.home_region(vin).await {
                warn!(vin = %vin, error = %e, "home region lookup failed, retrying on first poll");
            }
        }

        self.vehicles = Some(vins);
        Ok(())
    }

    /// One full pass: poll every vehicle, then publish every known state.
    pub async fn cycle(&mut self) {
        let started = Instant::now();

        if self.vehicles.is_none()
            && let Err(e) = self.discover().await
        {
            error!(error = %e, "vehicle discovery failed, retrying next cycle");
            metrics::record_poll("discovery_failed");
            return;
        }
        let vins = self.vehicles.clone().unwrap_or_default();

        for vin in &vins {
            match self.poller.poll_vehicle(&self.session, vin).await {
                Ok(outcome) => {
                    if outcome == PollOutcome::Throttled {
                        debug!(
                            vin = %vin,
                            cached = self.poller.state(vin).is_some(),
                            "poll suppressed by throttle window"
                        );
                    }
                    metrics::record_poll(outcome.label());
                }
                Err(e) => {
                    warn!(vin = %vin, error = %e, "vehicle poll failed, skipping this cycle");
                    metrics::record_poll("error");
                    continue;
                }
            }

            if self.request_updates
                && let Err(e) = self.session.request_status_update(vin).await
            {
                warn!(vin = %vin, error = %e, "status update request failed");
            }
        }

        for (vin, state) in self.poller.states() {
            let overall = self
                .publisher
                .publish_vehicle(self.sink.as_ref(), vin, state)
                .await;
            info!(vin = %vin, general_status = %overall, "vehicle published");
        }
        debug!(sensors = self.publisher.configured_count(), "publish pass complete");

        metrics::record_cycle_duration(started.elapsed().as_secs_f64());
    }
}

/// Run `poll` every `interval` until `stop` flips to `true`.
pub async fn run_poll_loop(
    mut poll: PollLoop,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => poll.cycle().await,
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    debug!("poll loop stopping");
                    return;
                }
            }
        }
    }
}

/// Owns the two background tasks for the process lifetime.
pub struct Scheduler {
    session: Arc<Session>,
    poll: PollLoop,
    poll_interval: Duration,
    refresh_interval: Duration,
}

impl Scheduler {
    pub fn new(
        session: Arc<Session>,
        poll: PollLoop,
        poll_interval: Duration,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            session,
            poll,
            poll_interval,
            refresh_interval,
        }
    }

    /// Start both tasks and run until `shutdown` resolves. An in-flight
    /// poll cycle is allowed to finish; the refresh task is aborted.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let (stop_tx, stop_rx) = watch::channel(false);

        let refresh: JoinHandle<()> =
            spawn_refresh_task(self.session.clone(), self.refresh_interval);
        let poll = tokio::spawn(run_poll_loop(self.poll, self.poll_interval, stop_rx));
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            refresh_interval_secs = self.refresh_interval.as_secs(),
            "scheduler running"
        );

        shutdown.await;

        let _ = stop_tx.send(true);
        if let Err(e) = poll.await {
            error!(error = %e, "poll task panicked");
        }
        refresh.abort();
        info!("scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::testing::RecordingSink;
    use common::Secret;
    use skoda_auth::{ClientProfile, Credentials, SessionTokens, TokenIssuer};
    use skoda_http::Executor;
    use skoda_session::{Endpoints, Templater};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VIN: &str = "TMBJJ7NE8L0000001";
    const OTHER_VIN: &str = "TMBJJ7NE8L0000002";

    async fn session(server: &MockServer) -> Arc<Session> {
        let session = Session::new(
            Executor::new().unwrap(),
            ClientProfile::default(),
            Credentials {
                email: "user@example.com".into(),
                password: Secret::new("hunter2".into()),
            },
            Endpoints {
                msg_base: server.uri(),
                mal_base: server.uri(),
            },
            Templater::new([("type", "skoda"), ("country", "CZ")]),
        );
        session
            .replace_tokens(SessionTokens {
                access_token: Secret::new("at".into()),
                refresh_token: Secret::new("rt".into()),
                obtained_at: Instant::now(),
                lifetime: None,
                issuer: TokenIssuer::Vehicle,
            })
            .await;
        Arc::new(session)
    }

    async fn mount_discovery(server: &MockServer) {
        mount_discovery_of(server, &[VIN]).await;
    }

    async fn mount_discovery_of(server: &MockServer, vins: &[&str]) {
        Mock::given(method("GET"))
            .and(path("/fs-car/usermanagement/users/v1/skoda/CZ/vehicles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "userVehicles": {"vehicle": vins}
            })))
            .mount(server)
            .await;
        for vin in vins {
            Mock::given(method("GET"))
                .and(path(format!("/api/cs/vds/v1/vehicles/{vin}/homeRegion")))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "homeRegion": {"baseUri": {"content": format!("{}/api", server.uri())}}
                })))
                .mount(server)
                .await;
            Mock::given(method("GET"))
                .and(path(format!(
                    "/fs-car/promoter/portfolio/v1/skoda/CZ/vehicle/{vin}/carportdata"
                )))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "carportData": {"modelName": "Octavia"}
                })))
                .mount(server)
                .await;
            Mock::given(method("GET"))
                .and(path(format!("/api/rolesrights/operationlist/v3/vehicles/{vin}")))
                .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
                .mount(server)
                .await;
        }
    }

    fn status_doc(lock_text: &str) -> Value {
        serde_json::json!({
            "StoredVehicleDataResponse": {
                "vin": VIN,
                "vehicleData": {"data": [
                    {"id": "0x030104FFFF", "field": [
                        {"id": "0x0301040001", "value": "2", "textId": lock_text}
                    ]},
                    {"id": "0x030102FFFF", "field": [
                        {"id": "0x0301020001", "value": "2912", "textId": "temperature_outside"}
                    ]}
                ]}
            }
        })
    }

    fn status_path() -> String {
        status_path_of(VIN)
    }

    fn status_path_of(vin: &str) -> String {
        format!("/fs-car/bs/vsr/v1/skoda/CZ/vehicles/{vin}/status")
    }

    #[tokio::test]
    async fn cycle_discovers_polls_and_publishes() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;
        Mock::given(method("GET"))
            .and(path(status_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_doc("door_locked")))
            .mount(&server)
            .await;

        let sink = Arc::new(RecordingSink::default());
        let mut poll = PollLoop::new(session(&server).await, sink.clone(), "skoda2mqtt", false);
        poll.cycle().await;

        assert_eq!(poll.vehicles.as_deref(), Some(&[VIN.to_string()][..]));
        assert!(poll.vehicle_data.get(VIN).is_some());
        assert!(poll.vehicle_rights.get(VIN).is_none());

        let messages = sink.take();
        let discovery: Vec<_> = messages.iter().filter(|(_, _, retain)| *retain).collect();
        assert_eq!(discovery.len(), 2);
        assert!(messages.contains(&(
            format!("skoda2mqtt/{VIN}_TEMPERATURE_OUTSIDE/STATE"),
            "temperature_outside(18.0)".to_string(),
            false
        )));
        assert!(messages.contains(&(
            format!("skoda2mqtt/{VIN}_LOCK_STATE_LEFT_FRONT_DOOR/STATE"),
            "door_locked(2)".to_string(),
            false
        )));

        // Second pass republishes state only.
        poll.cycle().await;
        let messages = sink.take();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|(_, _, retain)| !retain));
    }

    #[tokio::test]
    async fn status_updates_do_not_hold_back_polling() {
        let server = MockServer::start().await;
        mount_discovery_of(&server, &[VIN, OTHER_VIN]).await;
        for vin in [VIN, OTHER_VIN] {
            Mock::given(method("GET"))
                .and(path(status_path_of(vin)))
                .respond_with(ResponseTemplate::new(200).set_body_json(status_doc("door_locked")))
                .expect(3)
                .mount(&server)
                .await;
            Mock::given(method("POST"))
                .and(path(format!("/fs-car/bs/vsr/v1/skoda/CZ/vehicles/{vin}/requests")))
                .respond_with(ResponseTemplate::new(202))
                .expect(1)
                .mount(&server)
                .await;
        }

        let session = session(&server).await;
        let sink = Arc::new(RecordingSink::default());
        let mut poll = PollLoop::new(session.clone(), sink, "skoda2mqtt", true);
        for _ in 0..3 {
            poll.cycle().await;
        }

        assert!(!session.executor().throttle().is_active());
        assert!(poll.poller.state(VIN).is_some());
        assert!(poll.poller.state(OTHER_VIN).is_some());
    }

    #[tokio::test]
    async fn throttled_session_skips_status_fetch() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;
        Mock::given(method("GET"))
            .and(path(status_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_doc("door_locked")))
            .expect(0)
            .mount(&server)
            .await;

        let session = session(&server).await;
        session.executor().throttle().engage();

        let sink = Arc::new(RecordingSink::default());
        let mut poll = PollLoop::new(session, sink.clone(), "skoda2mqtt", true);
        poll.cycle().await;

        assert!(poll.poller.state(VIN).is_none());
        assert!(sink.take().is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_keeps_previous_state() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;
        Mock::given(method("GET"))
            .and(path(status_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_doc("door_locked")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(status_path()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"StoredVehicleDataResponse": {}})),
            )
            .mount(&server)
            .await;

        let sink = Arc::new(RecordingSink::default());
        let mut poll = PollLoop::new(session(&server).await, sink.clone(), "skoda2mqtt", false);
        poll.cycle().await;
        let before = poll.poller.state(VIN).cloned();
        sink.take();

        poll.cycle().await;
        assert_eq!(poll.poller.state(VIN).cloned(), before);
        assert_eq!(sink.take().len(), 2);
    }

    #[tokio::test]
    async fn failed_discovery_is_retried_next_cycle() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fs-car/usermanagement/users/v1/skoda/CZ/vehicles"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_discovery(&server).await;
        Mock::given(method("GET"))
            .and(path(status_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_doc("door_locked")))
            .mount(&server)
            .await;

        let sink = Arc::new(RecordingSink::default());
        let mut poll = PollLoop::new(session(&server).await, sink.clone(), "skoda2mqtt", false);

        poll.cycle().await;
        assert!(poll.vehicles.as_deref().is_none());
        assert!(sink.take().is_empty());

        poll.cycle().await;
        assert!(poll.vehicles.as_deref().is_some());
        assert!(!sink.take().is_empty());
    }

    #[tokio::test]
    async fn scheduler_stops_on_shutdown() {
        let server = MockServer::start().await;
        let session = session(&server).await;
        let sink = Arc::new(RecordingSink::default());
        let poll = PollLoop::new(session.clone(), sink, "skoda2mqtt", false);

        let scheduler = Scheduler::new(
            session,
            poll,
            Duration::from_secs(60),
            Duration::from_secs(20),
        );
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(scheduler.run(async {
            let _ = rx.await;
        }));
        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
