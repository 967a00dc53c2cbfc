//! Dispatch across the cooperative scheduler and native Tokio tasks.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use strand_core::event_loop::EventLoop;
use strand_core::runtime::Builder;
use strand_runtime::dispatch::{BackendKind, Dispatch};
use strand_runtime::{BackendPreference, Error};
use tokio::task::LocalSet;

fn log_step(log: &Rc<RefCell<Vec<String>>>, step: String) {
    log.borrow_mut().push(step);
}

#[tokio::test]
async fn test_native_backend_outside_the_reactor() {
    let runtime = Builder::new().build();
    let dispatch = Rc::new(Dispatch::new(runtime.scheduler().clone()));
    assert_eq!(dispatch.kind(), BackendKind::Native);

    let local = LocalSet::new();
    let value = local
        .run_until(async move {
            let inner = dispatch.clone();
            let handle = dispatch.spawn(async move {
                let slept = inner.sleep(Duration::from_millis(5)).await?;
                Ok(slept >= Duration::from_millis(5))
            })?;
            assert_eq!(handle.kind(), BackendKind::Native);
            handle.join().await
        })
        .await
        .unwrap();

    assert_eq!(value.and_then(|v| v.get::<bool>()), Some(true));
}

#[tokio::test]
async fn test_native_tasks_interleave_on_pass() {
    let runtime = Builder::new().build();
    let dispatch = Rc::new(
        Dispatch::new(runtime.scheduler().clone()).with_preference(BackendPreference::Native),
    );
    let log = Rc::new(RefCell::new(Vec::new()));

    let local = LocalSet::new();
    local
        .run_until(async {
            let handles = ["A", "B"]
                .into_iter()
                .map(|name| {
                    let (inner, log) = (dispatch.clone(), log.clone());
                    dispatch.spawn(async move {
                        for i in 1..=3 {
                            log_step(&log, format!("{name}{i}"));
                            inner.pass().await?;
                        }
                        Ok(())
                    })
                })
                .collect::<Result<Vec<_>, Error>>()?;

            for handle in handles {
                handle.join().await?;
            }
            Ok::<_, Error>(())
        })
        .await
        .unwrap();

    assert_eq!(*log.borrow(), ["A1", "B1", "A2", "B2", "A3", "B3"]);
}

#[tokio::test]
async fn test_native_task_error_and_abort() {
    let runtime = Builder::new().build();
    let dispatch = Dispatch::new(runtime.scheduler().clone());

    let local = LocalSet::new();
    local
        .run_until(async {
            let failing = dispatch
                .spawn::<_, ()>(async { Err(strand_core::Error::msg("boom")) })
                .unwrap();
            let error = failing.join().await.unwrap_err();
            assert_eq!(error.to_string(), "boom");

            let sleeper = dispatch
                .spawn(async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                })
                .unwrap();
            sleeper.abort().unwrap();
            assert!(sleeper.join().await.unwrap().is_none());
        })
        .await;
}

#[test]
fn test_same_code_runs_cooperatively_inside_the_reactor() {
    let runtime = Builder::new().virtual_clock().build();
    let dispatch = Rc::new(Dispatch::new(runtime.scheduler().clone()));
    let log = Rc::new(RefCell::new(Vec::new()));

    let inner_log = log.clone();
    runtime
        .block_on(async move {
            let mut handles = Vec::new();
            for name in ["A", "B"] {
                let (inner, log) = (dispatch.clone(), inner_log.clone());
                handles.push(dispatch.spawn(async move {
                    for i in 1..=3 {
                        log_step(&log, format!("{name}{i}"));
                        inner.sleep(Duration::from_millis(100)).await?;
                    }
                    Ok(())
                })?);
            }
            assert!(handles.iter().all(|h| h.kind() == BackendKind::Cooperative));

            for handle in handles {
                handle.join().await?;
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(*log.borrow(), ["A1", "B1", "A2", "B2", "A3", "B3"]);
    assert_eq!(runtime.reactor().now(), Duration::from_millis(300));
}
