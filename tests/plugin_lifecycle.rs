//! Plugin phases around server startup.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use portplex::config::PortConfig;
use portplex::error::{ConfigurationError, PluginError, ServerError};
use portplex::net::PortHandlers;
use portplex::plugin::{Context, LifecyclePhase, Plugin, PluginNode, Ready};
use portplex::Server;

mod common;

type Log = Arc<Mutex<Vec<String>>>;

struct Step {
    name: &'static str,
    log: Log,
    fail_in: Option<LifecyclePhase>,
}

impl Step {
    fn node(name: &'static str, log: &Log) -> PluginNode {
        PluginNode::new(Arc::new(Step {
            name,
            log: Arc::clone(log),
            fail_in: None,
        }))
    }

    fn record(&self, ctx: &Context) -> Result<(), PluginError> {
        if self.fail_in == Some(ctx.phase()) {
            return Err(PluginError::hook(self.name, ctx.phase().as_str(), "refused"));
        }
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}", ctx.phase(), self.name));
        Ok(())
    }
}

#[async_trait]
impl Plugin for Step {
    fn name(&self) -> &str {
        self.name
    }

    async fn before_server_start(&self, ctx: &Context, _ready: &Ready) -> Result<(), PluginError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.record(ctx)
    }

    async fn before_process_start(&self, ctx: &Context, _ready: &Ready) -> Result<(), PluginError> {
        self.record(ctx)
    }
}

fn server_with_tcp() -> Server {
    let mut server = Server::new(common::config(vec![PortConfig::tcp("raw", "127.0.0.1", 0)])).unwrap();
    let (handlers, _events) = common::handlers(&server);
    server.handle("raw", handlers).unwrap();
    server
}

#[tokio::test]
async fn phases_run_in_dependency_order() {
    let log: Log = Arc::default();
    let mut server = server_with_tcp();
    server.register_plugin(Step::node("cache", &log).at_after("db")).unwrap();
    server.register_plugin(Step::node("db", &log)).unwrap();
    server.register_plugin(Step::node("http", &log).at_after("cache")).unwrap();

    let running = server.start().await.unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "before_server_start:db",
            "before_server_start:cache",
            "before_server_start:http",
            "before_process_start:db",
            "before_process_start:cache",
            "before_process_start:http",
        ]
    );

    let names: Vec<_> = running.plugins().statuses().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["db", "cache", "http"]);
    running.shutdown().await;
}

#[tokio::test]
async fn failing_hook_aborts_startup() {
    let log: Log = Arc::default();
    let mut server = server_with_tcp();
    server
        .register_plugin(PluginNode::new(Arc::new(Step {
            name: "broken",
            log: Arc::clone(&log),
            fail_in: Some(LifecyclePhase::BeforeProcessStart),
        })))
        .unwrap();

    let err = server.start().await.err().unwrap();
    assert!(matches!(err, ServerError::Plugin(PluginError::Hook { .. })));
    assert_eq!(*log.lock().unwrap(), vec!["before_server_start:broken"]);
}

#[tokio::test]
async fn unresolved_predecessor_fails_before_any_hook() {
    let log: Log = Arc::default();
    let mut server = server_with_tcp();
    server.register_plugin(Step::node("orphan", &log).at_after("missing")).unwrap();

    let err = server.start().await.err().unwrap();
    assert!(matches!(
        err,
        ServerError::Configuration(ConfigurationError::UnresolvedPredecessor { .. })
    ));
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn missing_handler_fails_before_any_hook() {
    let log: Log = Arc::default();
    let mut server = Server::new(common::config(vec![PortConfig::websocket("ws", "127.0.0.1", 0)])).unwrap();
    server.register_plugin(Step::node("early", &log)).unwrap();
    server.handle("ws", PortHandlers::new()).unwrap();

    let err = server.start().await.err().unwrap();
    assert!(matches!(
        err,
        ServerError::Configuration(ConfigurationError::MissingHandler { .. })
    ));
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_port_and_cycles_are_configuration_errors() {
    let log: Log = Arc::default();
    let mut server = server_with_tcp();

    assert_eq!(
        server.handle("nope", PortHandlers::new()).err(),
        Some(ConfigurationError::UnknownPort("nope".into()))
    );

    server.register_plugin(Step::node("a", &log).at_after("b")).unwrap();
    assert!(matches!(
        server.register_plugin(Step::node("b", &log).at_after("a")),
        Err(ConfigurationError::DependencyCycle(_))
    ));
}
