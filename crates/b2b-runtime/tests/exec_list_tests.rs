//! 列表执行器端到端测试
//!
//! 在真实后台线程上验证会话规则：
//! 1. 单次列表按顺序执行，回调只触发一次（COMPLETE）
//! 2. 忙碌拒绝、循环抢占（NEWSTART）
//! 3. 单项返回 false / 外部停止（包括静默停止）时回调只触发一次（STOP）
//! 4. 回调内部可以再次调用执行器

use b2b_runtime::{
    AsyncListExecutor, DoneCallback, DoneReason, ExecError, ExecutorHandle, ListWorker,
    StopOutcome, done_callback,
};
use crossbeam_channel::{Receiver, Sender, unbounded};
use proptest::prelude::*;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(3);

/// 执行事件
#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Begin(&'static str),
    End(&'static str),
    Yield,
}

/// 记录每一项的开始/结束；`stop_on` 项返回 false
struct RecordingWorker {
    tx: Sender<Event>,
    delay: Duration,
    stop_on: Option<&'static str>,
    in_flight: Arc<AtomicUsize>,
    overlapped: Arc<AtomicBool>,
}

impl ListWorker<&'static str> for RecordingWorker {
    fn execute(&mut self, item: &&'static str) -> bool {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) != 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        let _ = self.tx.send(Event::Begin(item));
        thread::sleep(self.delay);
        let _ = self.tx.send(Event::End(item));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Some(*item) != self.stop_on
    }

    fn yield_now(&mut self) {
        let _ = self.tx.send(Event::Yield);
        thread::sleep(Duration::from_millis(1));
    }
}

struct Fixture {
    executor: AsyncListExecutor<&'static str, RecordingWorker>,
    events: Receiver<Event>,
    overlapped: Arc<AtomicBool>,
}

fn fixture(delay_ms: u64, stop_on: Option<&'static str>) -> Fixture {
    let (tx, events) = unbounded();
    let overlapped = Arc::new(AtomicBool::new(false));
    let worker = RecordingWorker {
        tx,
        delay: Duration::from_millis(delay_ms),
        stop_on,
        in_flight: Arc::new(AtomicUsize::new(0)),
        overlapped: overlapped.clone(),
    };
    let mut executor = AsyncListExecutor::new("recorder", worker);
    executor.start().unwrap();
    Fixture {
        executor,
        events,
        overlapped,
    }
}

fn identity(items: &[&'static str]) -> Result<Vec<&'static str>, Infallible> {
    Ok(items.to_vec())
}

fn reasons() -> (DoneCallback, Receiver<DoneReason>) {
    let (tx, rx) = unbounded();
    (done_callback(move |reason| tx.send(reason).is_ok()), rx)
}

/// 等待某一项开始执行
fn wait_begin(events: &Receiver<Event>, item: &'static str) {
    loop {
        match events.recv_timeout(WAIT) {
            Ok(Event::Begin(name)) if name == item => return,
            Ok(_) => continue,
            Err(e) => panic!("Item {} never started: {:?}", item, e),
        }
    }
}

fn items_begun(events: &Receiver<Event>) -> Vec<&'static str> {
    events
        .try_iter()
        .filter_map(|e| match e {
            Event::Begin(name) => Some(name),
            _ => None,
        })
        .collect()
}

#[test]
fn demo_list_runs_in_order_then_completes() {
    let mut f = fixture(5, None);
    let (cb, done) = reasons();

    f.executor.execute_list("demo", &["A", "B", "C"], identity, false, Some(cb)).unwrap();
    assert_eq!(done.recv_timeout(WAIT).unwrap(), DoneReason::Complete);

    let events: Vec<Event> = f.events.try_iter().filter(|e| *e != Event::Yield).collect();
    assert_eq!(
        events,
        vec![
            Event::Begin("A"),
            Event::End("A"),
            Event::Begin("B"),
            Event::End("B"),
            Event::Begin("C"),
            Event::End("C"),
        ]
    );
    assert!(!f.executor.is_executing());

    // 之后只有空闲轮次的 yield，不会再次回调
    thread::sleep(Duration::from_millis(20));
    assert!(f.events.try_iter().all(|e| e == Event::Yield));
    assert!(done.try_recv().is_err());
    f.executor.stop().unwrap();
}

#[test]
fn busy_rejection_leaves_session_running() {
    let mut f = fixture(20, None);
    let (cb, done) = reasons();

    f.executor.execute_list("first", &["A", "B"], identity, false, Some(cb)).unwrap();
    wait_begin(&f.events, "A");

    let err = f.executor.execute_list("second", &["X"], identity, false, None).unwrap_err();
    assert!(matches!(err, ExecError::Busy { items: 1, .. }));
    assert_eq!(err.to_string(), "second(1) ignored: already busy executing a previous list");

    assert_eq!(done.recv_timeout(WAIT).unwrap(), DoneReason::Complete);
    let begun = items_begun(&f.events);
    assert_eq!(begun, vec!["B"]);
    f.executor.stop().unwrap();
}

#[test]
fn preempting_a_loop_reports_new_start_then_runs_new_list() {
    let mut f = fixture(30, None);
    let (cb1, done1) = reasons();
    let (cb2, done2) = reasons();

    f.executor.execute_list("loop", &["L1", "L2"], identity, true, Some(cb1)).unwrap();
    wait_begin(&f.events, "L2");
    wait_begin(&f.events, "L1");

    f.executor.execute_list("next", &["N1", "N2"], identity, false, Some(cb2)).unwrap();
    assert_eq!(done1.recv_timeout(WAIT).unwrap(), DoneReason::NewStart);

    assert_eq!(done2.recv_timeout(WAIT).unwrap(), DoneReason::Complete);
    let begun = items_begun(&f.events);
    assert_eq!(begun, vec!["N1", "N2"]);

    // 每个会话的回调都只触发一次
    thread::sleep(Duration::from_millis(30));
    assert!(done1.try_recv().is_err());
    assert!(done2.try_recv().is_err());
    assert_eq!(f.executor.metrics().sessions_preempted, 1);
    f.executor.stop().unwrap();
}

#[test]
fn item_returning_false_stops_without_looping() {
    let mut f = fixture(1, Some("B"));
    let (cb, done) = reasons();

    f.executor.execute_list("stops", &["A", "B", "C"], identity, true, Some(cb)).unwrap();
    assert_eq!(done.recv_timeout(WAIT).unwrap(), DoneReason::Stop);

    thread::sleep(Duration::from_millis(20));
    assert_eq!(items_begun(&f.events), vec!["A", "B"]);
    assert!(!f.executor.is_executing());
    assert!(done.try_recv().is_err());
    f.executor.stop().unwrap();
}

#[test]
fn external_stop_cancels_remainder_but_not_current_item() {
    let mut f = fixture(30, None);
    let (cb, done) = reasons();

    f.executor.execute_list("long", &["A", "B", "C"], identity, false, Some(cb)).unwrap();
    wait_begin(&f.events, "A");

    let outcome = f.executor.stop_executing(DoneReason::Stop, true, true);
    assert_eq!(outcome, StopOutcome::Stopped { items: 3 });
    assert_eq!(done.recv_timeout(WAIT).unwrap(), DoneReason::Stop);

    // A 跑完，B/C 不执行，后台线程也不会再触发回调
    thread::sleep(Duration::from_millis(60));
    let events: Vec<Event> = f.events.try_iter().filter(|e| *e != Event::Yield).collect();
    assert_eq!(events, vec![Event::End("A")]);
    assert!(done.try_recv().is_err());
    f.executor.stop().unwrap();
}

#[test]
fn quiet_stop_is_reported_once_by_worker() {
    let mut f = fixture(40, None);
    let (cb, done) = reasons();

    f.executor.execute_list("quiet", &["A", "B", "C"], identity, true, Some(cb)).unwrap();
    wait_begin(&f.events, "A");
    let outcome = f.executor.stop_executing(DoneReason::Stop, false, false);
    assert_eq!(outcome, StopOutcome::Stopped { items: 3 });

    // 后台线程跑完 A 后发现会话已停止，以 STOP 通知一次
    assert_eq!(done.recv_timeout(Duration::from_millis(300)).unwrap(), DoneReason::Stop);
    thread::sleep(Duration::from_millis(60));
    assert!(done.try_recv().is_err());
    assert!(items_begun(&f.events).is_empty());
    assert_eq!(f.executor.stop_executing(DoneReason::Stop, true, false), StopOutcome::Idle);

    f.executor.stop().unwrap();
    assert!(done.try_recv().is_err());
    assert_eq!(f.executor.metrics().callbacks_fired, 1);
}

#[test]
fn callback_can_start_next_list() {
    let mut f = fixture(1, None);
    let (cb_second, done_second) = reasons();
    let handle: ExecutorHandle<&'static str> = f.executor.handle();

    let chained = done_callback(move |reason| {
        assert_eq!(reason, DoneReason::Complete);
        handle.execute_list("second", &["Z"], identity, false, Some(cb_second.clone())).is_ok()
    });

    f.executor.execute_list("first", &["Y"], identity, false, Some(chained)).unwrap();
    assert_eq!(done_second.recv_timeout(WAIT).unwrap(), DoneReason::Complete);

    thread::sleep(Duration::from_millis(10));
    assert_eq!(items_begun(&f.events), vec!["Y", "Z"]);
    assert_eq!(f.executor.metrics().callbacks_fired, 2);
    f.executor.stop().unwrap();
}

#[test]
fn item_can_stop_its_own_session() {
    struct SelfStopping {
        handle: Option<ExecutorHandle<u32>>,
        seen: Sender<u32>,
    }

    impl ListWorker<u32> for SelfStopping {
        fn execute(&mut self, item: &u32) -> bool {
            let _ = self.seen.send(*item);
            if *item == 2
                && let Some(handle) = &self.handle
            {
                handle.stop_executing(DoneReason::Stop, true, false);
            }
            true
        }
    }

    let (seen_tx, seen) = unbounded();
    let mut executor = AsyncListExecutor::new(
        "self-stop",
        SelfStopping {
            handle: None,
            seen: seen_tx,
        },
    );
    let handle = executor.handle();
    executor.with_worker(|w| w.handle = Some(handle)).unwrap();
    executor.start().unwrap();

    let (cb, done) = reasons();
    executor
        .execute_list("self", &[1u32, 2, 3], |v| Ok::<_, Infallible>(v.to_vec()), false, Some(cb))
        .unwrap();

    assert_eq!(done.recv_timeout(WAIT).unwrap(), DoneReason::Stop);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(seen.try_iter().collect::<Vec<_>>(), vec![1, 2]);
    assert!(done.try_recv().is_err());
    executor.stop().unwrap();
}

#[test]
fn concurrent_submitters_never_overlap() {
    let mut f = fixture(2, None);
    let handle = f.executor.handle();
    let completions = Arc::new(AtomicUsize::new(0));

    let submitters: Vec<_> = (0..4)
        .map(|_| {
            let handle = handle.clone();
            let completions = completions.clone();
            thread::spawn(move || {
                let mut accepted = 0;
                for _ in 0..20 {
                    let completions = completions.clone();
                    let cb = done_callback(move |_| {
                        completions.fetch_add(1, Ordering::SeqCst);
                        true
                    });
                    if handle.execute_list("race", &["P", "Q"], identity, false, Some(cb)).is_ok() {
                        accepted += 1;
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                accepted
            })
        })
        .collect();

    let accepted: usize = submitters.into_iter().map(|h| h.join().unwrap()).sum();
    while f.executor.is_executing() {
        thread::sleep(Duration::from_millis(1));
    }
    f.executor.stop().unwrap();

    assert!(accepted >= 1);
    assert_eq!(completions.load(Ordering::SeqCst), accepted);
    assert!(!f.overlapped.load(Ordering::SeqCst));
}

#[test]
fn stop_and_restart_resumes_pending_session() {
    let mut f = fixture(1, None);
    f.executor.stop().unwrap();

    let (cb, done) = reasons();
    f.executor.execute_list("later", &["A"], identity, false, Some(cb)).unwrap();
    thread::sleep(Duration::from_millis(20));
    assert!(done.try_recv().is_err());
    assert!(f.executor.is_executing());

    f.executor.start().unwrap();
    assert_eq!(done.recv_timeout(WAIT).unwrap(), DoneReason::Complete);
    f.executor.stop_timeout(Duration::from_secs(1)).unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// 任意列表都按提交顺序执行，回调恰好一次
    #[test]
    fn one_shot_lists_execute_in_order(len in 1usize..6) {
        const NAMES: [&str; 6] = ["a", "b", "c", "d", "e", "f"];
        let mut f = fixture(0, None);
        let (cb, done) = reasons();
        let items = &NAMES[..len];

        f.executor.execute_list("prop", items, identity, false, Some(cb)).unwrap();
        prop_assert_eq!(done.recv_timeout(WAIT).unwrap(), DoneReason::Complete);
        f.executor.stop().unwrap();

        prop_assert_eq!(items_begun(&f.events), items.to_vec());
        prop_assert!(done.try_recv().is_err());
    }
}
