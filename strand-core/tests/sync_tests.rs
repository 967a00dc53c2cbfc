//! Integration tests for Mutex, ConditionVariable and Queue.

use std::cell::RefCell;
use std::rc::Rc;
use strand_core::sync::{ConditionVariable, Mutex, Queue};
use strand_core::{current, now, pass, sleep, spawn, stop, yield_now, Duration, Error, Task};

type Log = Rc<RefCell<Vec<String>>>;

fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

#[strand_core::test]
async fn test_mutex_is_exclusive_and_fifo() {
    let mutex = Mutex::new();
    let log = new_log();

    let workers: Vec<Task> = (0..3)
        .map(|i| {
            let (mutex, log) = (mutex.clone(), log.clone());
            spawn(async move {
                mutex.lock().await?;
                log.borrow_mut().push(format!("start {i}"));
                sleep(Duration::from_millis(10)).await?;
                log.borrow_mut().push(format!("end {i}"));
                mutex.unlock()
            })
            .unwrap()
        })
        .collect();

    assert!(mutex.is_locked());
    assert_eq!(mutex.num_waiting(), 2);
    assert_eq!(mutex.owner(), Some(workers[0].clone()));

    for worker in &workers {
        worker.join(None).await.unwrap();
    }

    assert_eq!(
        *log.borrow(),
        ["start 0", "end 0", "start 1", "end 1", "start 2", "end 2"]
    );
    assert!(!mutex.is_locked());
    assert_eq!(mutex.num_waiting(), 0);
}

#[strand_core::test]
async fn test_mutex_misuse() {
    let mutex = Mutex::new();
    mutex.lock().await.unwrap();
    assert!(mutex.is_owned());
    assert!(matches!(mutex.lock().await, Err(Error::Deadlock(_))));
    assert!(!mutex.try_lock().unwrap());

    let other = {
        let mutex = mutex.clone();
        spawn(async move { mutex.unlock() }).unwrap()
    };
    let error = other.join(None).await.unwrap_err();
    assert!(matches!(error.root_cause(), Error::NotOwner(_)));

    mutex.unlock().unwrap();
    assert!(!mutex.is_owned());
    assert!(matches!(mutex.unlock(), Err(Error::NotOwner(_))));
    assert!(mutex.try_lock().unwrap());
    mutex.unlock().unwrap();
}

#[strand_core::test]
async fn test_killed_holder_releases_mutex() {
    let mutex = Mutex::new();

    let holder = {
        let mutex = mutex.clone();
        spawn(async move {
            mutex.lock().await?;
            stop().await?;
            mutex.unlock()
        })
        .unwrap()
    };
    let waiter = {
        let mutex = mutex.clone();
        spawn(async move {
            mutex.lock().await?;
            let owned = mutex.is_owned();
            mutex.unlock()?;
            Ok(owned)
        })
        .unwrap()
    };

    assert_eq!(mutex.owner(), Some(holder.clone()));
    holder.kill().unwrap();

    assert_eq!(mutex.owner(), Some(waiter.clone()));
    let owned = waiter.value().await.unwrap().unwrap();
    assert_eq!(owned.get::<bool>(), Some(true));
    assert!(!mutex.is_locked());
}

#[strand_core::test]
async fn test_waiter_killed_after_handoff_passes_it_on() {
    let mutex = Mutex::new();
    mutex.lock().await.unwrap();

    let contenders: Vec<Task> = (0..2)
        .map(|_| {
            let mutex = mutex.clone();
            spawn(async move {
                mutex.lock().await?;
                mutex.unlock()
            })
            .unwrap()
        })
        .collect();

    mutex.unlock().unwrap();
    assert_eq!(mutex.owner(), Some(contenders[0].clone()));

    contenders[0].kill().unwrap();
    assert_eq!(mutex.owner(), Some(contenders[1].clone()));

    contenders[1].join(None).await.unwrap();
    assert!(!mutex.is_locked());
}

#[strand_core::test]
async fn test_synchronize_releases_on_kill() {
    let mutex = Mutex::new();

    let task = {
        let mutex = mutex.clone();
        spawn(async move {
            mutex
                .synchronize(|| async {
                    stop().await?;
                    Ok(())
                })
                .await
        })
        .unwrap()
    };

    assert!(mutex.is_locked());
    task.kill().unwrap();
    assert!(!mutex.is_locked());

    let value = mutex
        .synchronize(|| async { Ok(current()?.id()) })
        .await
        .unwrap();
    assert_eq!(value, current().unwrap().id());
    assert!(!mutex.is_locked());
}

#[strand_core::test]
async fn test_signal_wakes_earliest_waiter() {
    let cond = ConditionVariable::new();
    let log = new_log();

    let waiters: Vec<Task> = (0..3)
        .map(|i| {
            let (cond, log) = (cond.clone(), log.clone());
            spawn(async move {
                let signaled = cond.wait(None, None).await?;
                log.borrow_mut().push(format!("{i}:{signaled}"));
                Ok(())
            })
            .unwrap()
        })
        .collect();
    assert_eq!(cond.num_waiting(), 3);

    cond.signal();
    // Woken on a later turn, never reentrantly.
    assert!(log.borrow().is_empty());
    pass().await.unwrap();
    assert_eq!(*log.borrow(), ["0:true"]);
    assert_eq!(cond.num_waiting(), 2);

    cond.broadcast();
    pass().await.unwrap();
    assert_eq!(*log.borrow(), ["0:true", "1:true", "2:true"]);
    assert!(waiters.iter().all(|task| !task.is_alive()));

    // Nothing is waiting: signal is a no-op.
    cond.signal();
}

#[strand_core::test]
async fn test_wait_times_out_when_never_signaled() {
    let cond = ConditionVariable::new();
    let mutex = Mutex::new();

    mutex.lock().await.unwrap();
    let started = now().unwrap();
    let signaled = cond
        .wait(Some(&mutex), Some(Duration::from_millis(50)))
        .await
        .unwrap();

    assert!(!signaled);
    assert_eq!(now().unwrap() - started, Duration::from_millis(50));
    assert!(mutex.is_owned());
    assert_eq!(cond.num_waiting(), 0);
    mutex.unlock().unwrap();
}

#[strand_core::test]
async fn test_wait_releases_and_reacquires_mutex() {
    let cond = ConditionVariable::new();
    let mutex = Mutex::new();

    let waiter = {
        let (cond, mutex) = (cond.clone(), mutex.clone());
        spawn(async move {
            mutex.lock().await?;
            let signaled = cond.wait(Some(&mutex), None).await?;
            let owned = mutex.is_owned();
            mutex.unlock()?;
            Ok((signaled, owned))
        })
        .unwrap()
    };

    assert!(!mutex.is_locked());
    mutex.lock().await.unwrap();
    cond.signal();
    pass().await.unwrap();
    // The waiter is awake but blocked on the mutex we hold.
    assert_eq!(mutex.num_waiting(), 1);
    mutex.unlock().unwrap();

    let value = waiter.value().await.unwrap().unwrap();
    assert_eq!(value.get::<(bool, bool)>(), Some((true, true)));
}

#[strand_core::test]
async fn test_signal_wins_over_simultaneous_timeout() {
    let cond = ConditionVariable::new();

    let signaler = {
        let cond = cond.clone();
        spawn(async move {
            sleep(Duration::from_millis(10)).await?;
            cond.signal();
            Ok(())
        })
        .unwrap()
    };
    let waiter = {
        let cond = cond.clone();
        spawn(async move { cond.wait(None, Some(Duration::from_millis(10))).await }).unwrap()
    };

    signaler.join(None).await.unwrap();
    let signaled = waiter.value().await.unwrap().unwrap();
    assert_eq!(signaled.get::<bool>(), Some(true));
}

#[strand_core::test]
async fn test_condition_wait_survives_out_of_order_resume() {
    let cond = ConditionVariable::new();

    let waiter = {
        let cond = cond.clone();
        spawn(async move {
            let signaled = cond.wait(None, None).await?;
            let stray = yield_now().await?;
            Ok((signaled, stray.get::<i32>()))
        })
        .unwrap()
    };

    waiter.resume(7).unwrap();
    assert_eq!(cond.num_waiting(), 1);
    assert!(waiter.is_alive());

    cond.signal();
    let value = waiter.value().await.unwrap().unwrap();
    assert_eq!(value.get::<(bool, Option<i32>)>(), Some((true, Some(7))));
}

#[strand_core::test]
async fn test_wakeup_interrupts_condition_wait() {
    let cond = ConditionVariable::new();
    let waiter = {
        let cond = cond.clone();
        spawn(async move { cond.wait(None, None).await }).unwrap()
    };

    waiter.wakeup().unwrap();
    let signaled = waiter.value().await.unwrap().unwrap();
    assert_eq!(signaled.get::<bool>(), Some(false));
    assert_eq!(cond.num_waiting(), 0);
}

#[strand_core::test]
async fn test_queue_fifo_round_trip() {
    let queue = Queue::new();
    assert!(queue.is_empty());

    queue.push(1);
    queue.push(2);
    queue.push(3);
    assert_eq!(queue.len(), 3);

    assert_eq!(queue.pop(false).await.unwrap(), 1);
    assert_eq!(queue.pop(true).await.unwrap(), 2);
    assert_eq!(queue.try_pop(), Some(3));
    assert!(matches!(queue.pop(true).await, Err(Error::EmptyQueue)));
    assert_eq!(queue.try_pop(), None);

    queue.push(4);
    queue.clear();
    assert!(queue.is_empty());
}

#[strand_core::test]
async fn test_queue_num_waiting_counts_blocked_poppers() {
    let queue: Queue<usize> = Queue::new();
    let mut poppers = Vec::new();

    for i in 0..5 {
        assert_eq!(queue.num_waiting(), i);
        let queue = queue.clone();
        poppers.push(spawn(async move { queue.pop(false).await }).unwrap());
    }
    assert_eq!(queue.num_waiting(), 5);

    for item in 0..5 {
        queue.push(item * 10);
    }
    assert_eq!(queue.num_waiting(), 0);
    assert!(queue.is_empty());

    for (i, popper) in poppers.iter().enumerate() {
        let value = popper.value().await.unwrap().unwrap();
        assert_eq!(value.get::<usize>(), Some(i * 10));
    }
}

#[strand_core::test]
async fn test_item_for_killed_popper_is_not_lost() {
    let queue: Queue<&str> = Queue::new();
    let first = {
        let queue = queue.clone();
        spawn(async move { queue.pop(false).await }).unwrap()
    };

    queue.push("precious");
    first.kill().unwrap();

    assert_eq!(queue.len(), 1);
    assert_eq!(queue.try_pop(), Some("precious"));
}

#[strand_core::test]
async fn test_item_for_killed_popper_goes_to_next_popper() {
    let queue: Queue<&str> = Queue::new();
    let poppers: Vec<Task> = (0..2)
        .map(|_| {
            let queue = queue.clone();
            spawn(async move { queue.pop(false).await }).unwrap()
        })
        .collect();

    queue.push("handed on");
    poppers[0].kill().unwrap();
    assert!(queue.is_empty());

    let value = poppers[1].value().await.unwrap().unwrap();
    assert_eq!(value.get::<&str>(), Some("handed on"));
}

#[strand_core::test]
async fn test_producer_consumer() {
    let queue = Queue::new();
    let log = new_log();

    let producer = {
        let (queue, log) = (queue.clone(), log.clone());
        spawn(async move {
            for i in 0..5u64 {
                sleep(Duration::from_millis(i * 3)).await?;
                queue.push(i);
                log.borrow_mut().push(format!("{i} produced"));
            }
            Ok(())
        })
        .unwrap()
    };
    let consumer = {
        let (queue, log) = (queue.clone(), log.clone());
        spawn(async move {
            let mut total = 0;
            for i in 0..5u64 {
                let value = queue.pop(false).await?;
                sleep(Duration::from_millis(i * 2)).await?;
                log.borrow_mut().push(format!("consumed {value}"));
                total += value;
            }
            Ok(total)
        })
        .unwrap()
    };

    let total = consumer.value().await.unwrap().unwrap();
    producer.join(None).await.unwrap();
    assert_eq!(total.get::<u64>(), Some(10));

    let consumed: Vec<String> = log
        .borrow()
        .iter()
        .filter(|line| line.starts_with("consumed"))
        .cloned()
        .collect();
    assert_eq!(
        consumed,
        ["consumed 0", "consumed 1", "consumed 2", "consumed 3", "consumed 4"]
    );
}

#[strand_core::test]
async fn test_queue_debug_skips_abandoned_poppers() {
    use futures::future::{ready, select};

    let queue: Queue<i32> = Queue::new();
    let abandoned = select(Box::pin(queue.pop(false)), Box::pin(ready(()))).await;
    drop(abandoned);

    assert_eq!(queue.num_waiting(), 0);
    assert_eq!(format!("{queue:?}"), "Queue { len: 0, num_waiting: 0 }");

    queue.push(3);
    assert_eq!(queue.pop(false).await.unwrap(), 3);
}
