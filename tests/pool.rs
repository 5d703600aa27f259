//! End-to-end pool behavior over the public API, with a factory defined the
//! way a downstream consumer would define one.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use motorpool::{Config, Credentials, Engine, EngineFactory, Error, Pool, Proxy, RequestRoute};

#[derive(Debug, Clone)]
struct TestEngine {
    id: usize,
    shutdowns: Arc<AtomicUsize>,
}

impl TestEngine {
    fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl Engine for TestEngine {
    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct TestFactory {
    sequence: AtomicUsize,
    log: Mutex<Vec<TestEngine>>,
}

impl TestFactory {
    fn build(&self) -> TestEngine {
        let engine = TestEngine {
            id: self.sequence.fetch_add(1, Ordering::SeqCst),
            shutdowns: Arc::new(AtomicUsize::new(0)),
        };
        self.log.lock().push(engine.clone());
        engine
    }

    fn built(&self) -> Vec<TestEngine> {
        self.log.lock().clone()
    }
}

impl EngineFactory for TestFactory {
    type Engine = TestEngine;

    fn create_default(&self) -> TestEngine {
        self.build()
    }

    fn create_no_proxy(&self) -> TestEngine {
        self.build()
    }

    fn create_for_proxy(&self, _proxy: &Proxy) -> TestEngine {
        self.build()
    }
}

fn target() -> http::Uri {
    "http://example.com/resource".parse().unwrap()
}

fn proxy(port: u16) -> Proxy {
    Proxy::new(format!("http://proxy.example.com:{port}").parse().unwrap())
}

#[tokio::test(start_paused = true)]
async fn engines_are_reused_then_rotated() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut config = Config::default();
    config.alive_time = Duration::from_millis(1500);
    config.dispose_delay = Duration::from_millis(1500);

    let factory = Arc::new(TestFactory::default());
    let pool = Pool::new(Arc::clone(&factory), config).unwrap();
    let route = RequestRoute::direct(target());

    let first = pool.rent(&route).unwrap().id;
    let second = pool.rent(&route).unwrap().id;
    assert_eq!(first, second, "engine should be re-used");

    tokio::time::sleep(Duration::from_millis(6000)).await;

    let third = pool.rent(&route).unwrap().id;
    assert_ne!(third, first, "engine should have been rotated out");

    // The original engine was rotated out, sat out its dispose delay with no
    // leases, and was torn down exactly once.
    assert_eq!(factory.built()[0].shutdown_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rent_storm_yields_one_engine_per_routing_class() {
    let _ = tracing_subscriber::fmt::try_init();

    let factory = Arc::new(TestFactory::default());
    let pool = Pool::new(Arc::clone(&factory), Config::default()).unwrap();

    let routes = [
        RequestRoute::direct(target()),
        RequestRoute::new(target()),
        RequestRoute::via(target(), proxy(3128)),
        RequestRoute::via(target(), proxy(8080)),
        RequestRoute::via(
            target(),
            proxy(3128).with_credentials(Credentials::new("alice", "a")),
        ),
        RequestRoute::via(
            target(),
            proxy(3128).with_credentials(Credentials::new("bob", "b")),
        ),
    ];

    // Warm every class up, then pin the engine identity each class must keep
    // serving for the rest of the storm.
    let expected: Vec<usize> = routes
        .iter()
        .map(|route| pool.rent(route).unwrap().id)
        .collect();

    let workers: Vec<_> = (0..8)
        .map(|worker| {
            let pool = pool.clone();
            let routes = routes.clone();
            let expected = expected.clone();
            tokio::task::spawn_blocking(move || {
                for i in 0..125_000usize {
                    let class = (i + worker) % routes.len();
                    let lease = pool.rent(&routes[class]).unwrap();
                    assert_eq!(lease.id, expected[class]);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.await.unwrap();
    }

    assert_eq!(factory.built().len(), routes.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn credentials_distinguish_proxy_identities() {
    let _ = tracing_subscriber::fmt::try_init();

    let factory = Arc::new(TestFactory::default());
    let pool = Pool::new(Arc::clone(&factory), Config::default()).unwrap();

    let users = ["ann", "ben", "cal", "dot", "eve", "fay", "gus"];
    let routes: Vec<RequestRoute> = users
        .iter()
        .map(|user| {
            RequestRoute::via(
                target(),
                proxy(3128).with_credentials(Credentials::new(*user, "secret")),
            )
        })
        .collect();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let pool = pool.clone();
            let routes = routes.clone();
            tokio::task::spawn_blocking(move || {
                let mut seen = HashSet::new();
                for i in 0..2500usize {
                    let lease = pool.rent(&routes[i % routes.len()]).unwrap();
                    seen.insert(lease.id);
                }
                seen
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for worker in workers {
        seen.extend(worker.await.unwrap());
    }

    assert_eq!(seen.len(), users.len(), "one engine per credential identity");
    assert_eq!(factory.built().len(), users.len());
}

#[tokio::test]
async fn close_disposes_every_engine_exactly_once() {
    let _ = tracing_subscriber::fmt::try_init();

    let factory = Arc::new(TestFactory::default());
    let pool = Pool::new(Arc::clone(&factory), Config::default()).unwrap();

    drop(pool.rent(&RequestRoute::direct(target())).unwrap());
    drop(pool.rent(&RequestRoute::new(target())).unwrap());
    let held = pool.rent(&RequestRoute::via(target(), proxy(3128))).unwrap();

    pool.close();
    pool.close();

    let built = factory.built();
    assert_eq!(built.len(), 3);
    for engine in &built {
        assert_eq!(engine.shutdown_count(), 1);
    }

    assert!(matches!(
        pool.rent(&RequestRoute::new(target())),
        Err(Error::Closed)
    ));

    // Releasing a lease after shutdown never tears the engine down twice.
    drop(held);
    for engine in &factory.built() {
        assert_eq!(engine.shutdown_count(), 1);
    }
}
