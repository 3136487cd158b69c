
use std::collections::HashSet;
use std::time::Duration;

use baton::error::{BatonError, Result};
use baton::store::{JobStore, JobUnit, WorkItem};
use baton::worker::{ItemProcessor, LoopOutcome, ShellProcessor, WorkLoop};
use test_harness::{process_running, wait_for_exit, TestWorkdir};

/// Groups by the `model` parameter and records every call.
#[derive(Default)]
struct Recorder {
    events: Vec<String>,
    fail: HashSet<String>,
    fail_groups: HashSet<String>,
    skip_marker: bool,
}

impl ItemProcessor for Recorder {
    fn group_key(&self, job: &JobUnit) -> String {
        job.param_str("model").unwrap_or("none").to_string()
    }

    async fn prepare(&mut self, group: &str) -> Result<()> {
        self.events.push(format!("prepare {group}"));
        if self.fail_groups.contains(group) {
            return Err(BatonError::Processor(format!("cannot load {group}")));
        }
        Ok(())
    }

    async fn process(&mut self, job: &JobUnit, item: &WorkItem) -> Result<()> {
        self.events.push(format!("process {}/{}", job.name(), item.name));
        if self.fail.contains(&item.name) {
            return Err(BatonError::Processor("boom".to_string()));
        }
        if !self.skip_marker {
            std::fs::write(&item.marker, "done").unwrap();
        }
        Ok(())
    }

    async fn release(&mut self, group: &str) {
        self.events.push(format!("release {group}"));
    }
}

#[tokio::test]
async fn test_loop_drains_queue() {
    let wd = TestWorkdir::new();
    wd.add_job("job1", "manifest: [a, b]\nmodel: tiny\n");

    let mut work_loop = WorkLoop::new(JobStore::new(&wd.config()), Recorder::default());
    assert_eq!(work_loop.run().await, LoopOutcome::Drained);

    assert!(wd.exists("job1/a.result"));
    assert!(wd.exists("job1/b.result"));
    assert!(work_loop.store_mut().discover().is_empty());
}

#[tokio::test]
async fn test_loop_groups_by_key() {
    let wd = TestWorkdir::new();
    wd.add_job("j1", "manifest: [a]\nmodel: large\n");
    wd.add_job("j2", "manifest: [b]\nmodel: tiny\n");
    wd.add_job("j3", "manifest: [c]\nmodel: large\n");

    let mut work_loop = WorkLoop::new(JobStore::new(&wd.config()), Recorder::default());
    assert_eq!(work_loop.run().await, LoopOutcome::Drained);

    assert_eq!(
        work_loop.processor().events,
        vec![
            "prepare large",
            "process j1/a",
            "process j3/c",
            "release large",
            "prepare tiny",
            "process j2/b",
            "release tiny",
        ]
    );
}

#[tokio::test]
async fn test_item_failure_does_not_abort_batch() {
    let wd = TestWorkdir::new();
    wd.add_job("job1", "manifest: [a, bad, c]\n");

    let recorder = Recorder {
        fail: HashSet::from(["bad".to_string()]),
        ..Default::default()
    };
    let mut work_loop = WorkLoop::new(JobStore::new(&wd.config()), recorder);

    // First pass completes a and c, second pass only retries "bad" and
    // makes no progress.
    assert_eq!(
        work_loop.run().await,
        LoopOutcome::Stalled { pending_jobs: 1 }
    );
    assert!(wd.exists("job1/a.result"));
    assert!(wd.exists("job1/c.result"));
    assert!(!wd.exists("job1/bad.result"));

    let events = &work_loop.processor().events;
    let bad_attempts = events.iter().filter(|e| *e == "process job1/bad").count();
    assert_eq!(bad_attempts, 2);
}

#[tokio::test]
async fn test_success_without_marker_counts_as_no_progress() {
    let wd = TestWorkdir::new();
    wd.add_job("job1", "manifest: [a]\n");

    let recorder = Recorder {
        skip_marker: true,
        ..Default::default()
    };
    let mut work_loop = WorkLoop::new(JobStore::new(&wd.config()), recorder);

    assert_eq!(
        work_loop.run().await,
        LoopOutcome::Stalled { pending_jobs: 1 }
    );
}

#[tokio::test]
async fn test_failed_prepare_skips_group() {
    let wd = TestWorkdir::new();
    wd.add_job("j1", "manifest: [a]\nmodel: broken\n");
    wd.add_job("j2", "manifest: [b]\nmodel: tiny\n");

    let recorder = Recorder {
        fail_groups: HashSet::from(["broken".to_string()]),
        ..Default::default()
    };
    let mut work_loop = WorkLoop::new(JobStore::new(&wd.config()), recorder);

    assert_eq!(
        work_loop.run().await,
        LoopOutcome::Stalled { pending_jobs: 1 }
    );
    assert!(!wd.exists("j1/a.result"));
    assert!(wd.exists("j2/b.result"));
    assert!(!work_loop
        .processor()
        .events
        .contains(&"release broken".to_string()));
}

#[tokio::test]
async fn test_run_pass_summary() {
    let wd = TestWorkdir::new();
    wd.add_job("job1", "manifest: [a, bad]\n");
    wd.add_job("job2", "manifest: [c]\n");

    let recorder = Recorder {
        fail: HashSet::from(["bad".to_string()]),
        ..Default::default()
    };
    let mut work_loop = WorkLoop::new(JobStore::new(&wd.config()), recorder);
    let batch = work_loop.store_mut().discover();
    let summary = work_loop.run_pass(batch).await;

    assert_eq!(summary.jobs, 2);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 1);
}

// =============================================================================
// Shell processor
// =============================================================================

#[tokio::test]
async fn test_shell_processor_writes_marker() {
    let wd = TestWorkdir::new();
    std::fs::create_dir_all(wd.jobdir("job1")).unwrap();
    std::fs::write(wd.jobdir("job1").join("hello.txt"), "hello world\n").unwrap();
    wd.add_job(
        "job1",
        "manifest: [hello.txt]\ncommand: 'wc -w < $item'\n",
    );

    let config = wd.config();
    let mut work_loop = WorkLoop::new(JobStore::new(&config), ShellProcessor::new(&config));
    assert_eq!(work_loop.run().await, LoopOutcome::Drained);

    assert_eq!(wd.read("job1/hello.txt.result").trim(), "2");
}

#[tokio::test]
async fn test_shell_processor_substitutes_paths() {
    let wd = TestWorkdir::new();
    wd.add_job(
        "job1",
        "manifest: [a]\ncommand: 'echo $jobdir $input $HOME_UNSET_BATON'\n",
    );

    let config = wd.config();
    let mut work_loop = WorkLoop::new(JobStore::new(&config), ShellProcessor::new(&config));
    assert_eq!(work_loop.run().await, LoopOutcome::Drained);

    let jobdir = wd.jobdir("job1");
    assert_eq!(
        wd.read("job1/a.result").trim(),
        format!("{} {}", jobdir.display(), jobdir.join("a").display())
    );
}

#[tokio::test]
async fn test_shell_processor_failure_leaves_item_pending() {
    let wd = TestWorkdir::new();
    wd.add_job(
        "job1",
        "manifest: [ok, bad]\ncommand: 'test $item = ok && echo fine'\n",
    );

    let config = wd.config();
    let mut work_loop = WorkLoop::new(JobStore::new(&config), ShellProcessor::new(&config));
    assert_eq!(
        work_loop.run().await,
        LoopOutcome::Stalled { pending_jobs: 1 }
    );

    assert_eq!(wd.read("job1/ok.result").trim(), "fine");
    assert!(!wd.exists("job1/bad.result"));
}

#[tokio::test]
async fn test_shell_processor_requires_command() {
    let wd = TestWorkdir::new();
    wd.add_job("job1", "manifest: [a]\n");

    let config = wd.config();
    let mut work_loop = WorkLoop::new(JobStore::new(&config), ShellProcessor::new(&config));
    assert_eq!(
        work_loop.run().await,
        LoopOutcome::Stalled { pending_jobs: 1 }
    );
}

#[test]
fn test_shell_processor_group_key() {
    let wd = TestWorkdir::new();
    wd.add_job("j1", "manifest: [a]\ngroup: gpu\n");
    wd.add_job("j2", "manifest: [a]\n");

    let config = wd.config();
    let units = JobStore::new(&config).discover();
    let processor = ShellProcessor::new(&config);

    assert_eq!(processor.group_key(&units[0]), "gpu");
    assert_eq!(processor.group_key(&units[1]), "default");
}

#[tokio::test]
async fn test_shell_processor_leaves_shell_pid_to_shell() {
    let wd = TestWorkdir::new();
    wd.add_job("job1", "manifest: [a]\ncommand: 'echo pid-$$'\n");

    let config = wd.config();
    let mut work_loop = WorkLoop::new(JobStore::new(&config), ShellProcessor::new(&config));
    assert_eq!(work_loop.run().await, LoopOutcome::Drained);

    let marker = wd.read("job1/a.result");
    let pid = marker.trim().strip_prefix("pid-").unwrap();
    assert!(!pid.is_empty());
    assert!(pid.chars().all(|c| c.is_ascii_digit()), "{marker}");
}

#[tokio::test]
async fn test_abandoned_item_process_group_is_killed() {
    let wd = TestWorkdir::new();
    wd.add_job(
        "job1",
        "manifest: [slow]\ncommand: 'sleep 47 & echo $! > $jobdir/pid; wait'\n",
    );
    let pid_file = wd.jobdir("job1").join("pid");

    let config = wd.config();
    let mut work_loop = WorkLoop::new(JobStore::new(&config), ShellProcessor::new(&config));

    let started = async {
        while !std::fs::read_to_string(&pid_file).map_or(false, |t| t.trim().parse::<i32>().is_ok()) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    tokio::select! {
        outcome = work_loop.run() => panic!("slow item finished early: {outcome:?}"),
        _ = tokio::time::timeout(Duration::from_secs(10), started) => {}
    }

    let pid: i32 = wd.read("job1/pid").trim().parse().unwrap();
    assert!(wait_for_exit(pid, Duration::from_secs(5)), "sleep {pid} still running");
    assert!(!process_running(pid));
    assert!(!wd.exists("job1/slow.result"));
}
