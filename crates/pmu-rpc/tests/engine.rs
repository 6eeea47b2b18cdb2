//! Protocol engine scenarios against the simulated PMU

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use common::{recorder, Harness};
use pmu_core::{Descriptor, Error, HandshakeError, QueueId, SeqId, UnitId};
use pmu_hal::regs::{self, pmc};
use pmu_hal::{Clock, FalconIrq};
use pmu_rpc::{
    Callback, Command, CompletionStatus, EngineConfig, EngineState, Payload, PayloadRegion,
    QueueGeometry, SlotState,
};
use pmu_sim::InitLayout;

const HPQ: usize = 0;

fn pg_command() -> Command {
    Command::new(UnitId::PG, vec![]).unwrap()
}

// =============================================================================
// HANDSHAKE
// =============================================================================

#[test]
fn test_handshake_configures_queues_and_dmem() {
    let h = Harness::booted();

    assert_eq!(h.engine.state(), EngineState::InitReceived);
    assert_eq!(
        h.engine.queues().geometry(QueueId::HPQ),
        Some(QueueGeometry {
            index: 0,
            offset: 0x1000,
            size: 0x200
        })
    );
    assert_eq!(
        h.engine.queues().geometry(QueueId::MESSAGE),
        Some(QueueGeometry {
            index: 0,
            offset: 0x1800,
            size: 0x400
        })
    );
    // init message consumed
    assert_eq!(h.sim.reg(regs::MSGQ_TAIL), h.sim.reg(regs::MSGQ_HEAD));
    assert!(h.engine.stats().dmem.is_some());
}

#[test]
fn test_handshake_rejects_wrong_unit() {
    let h = Harness::powered(EngineConfig::default());
    h.sim.boot_with(&InitLayout::default(), UnitId::PERFMON.0, 0);
    h.engine.on_interrupt();

    assert_eq!(
        h.engine.drain(),
        Err(Error::HandshakeFailed(HandshakeError::UnexpectedUnit(UnitId::PERFMON.0)))
    );
    assert!(!h.engine.is_ready());
    assert_eq!(h.engine.state(), EngineState::Error);
    assert_eq!(
        h.engine.post(pg_command(), None, None, QueueId::HPQ, None, 0),
        Err(Error::NotReady)
    );
}

#[test]
fn test_handshake_rejects_wrong_type() {
    let h = Harness::powered(EngineConfig::default());
    h.sim.boot_with(&InitLayout::default(), UnitId::INIT.0, 1);
    h.engine.on_interrupt();

    assert_eq!(
        h.engine.drain(),
        Err(Error::HandshakeFailed(HandshakeError::UnexpectedType(1)))
    );
    assert!(!h.engine.is_ready());
    assert!(h.engine.queues().geometry(QueueId::HPQ).is_none());
}

#[test]
fn test_init_scrub_timeout_rolls_back() {
    let h = Harness::booted();
    h.engine.shutdown();

    h.sim.set_reg(regs::DMACTL, regs::DMACTL_SCRUBBING);
    assert_eq!(h.engine.init(), Err(Error::Timeout));
    assert_eq!(h.engine.state(), EngineState::Off);
    assert_eq!(h.sim.reg(pmc::ENABLE) & pmc::ENABLE_PMU, 0);
}

#[test]
fn test_init_idle_timeout_is_busy() {
    let h = Harness::booted();
    h.engine.shutdown();

    h.sim.set_reg(regs::IDLESTATE, 1);
    assert_eq!(h.engine.init(), Err(Error::Busy));
    assert_eq!(h.engine.state(), EngineState::Off);
}

// =============================================================================
// POST / REPLY
// =============================================================================

#[test]
fn test_post_without_payload_round_trip() {
    let h = Harness::booted();
    let (replies, callback) = recorder();

    let desc = h
        .engine
        .post(pg_command(), None, None, QueueId::HPQ, Some(callback), 0)
        .unwrap();
    assert_eq!(desc, Descriptor(0));
    assert_eq!(h.engine.slot_state(SeqId(0)), SlotState::Used);

    let frames = h.sim.take_commands(HPQ);
    assert_eq!(frames.len(), 1);
    let cmd = &frames[0];
    assert_eq!(cmd.unit_id, UnitId::PG.0);
    assert_eq!(cmd.size, 8);
    assert_eq!(cmd.seq_id, 0);
    // STATUS | INTR
    assert_eq!(cmd.ctrl_flags, 0x03);

    h.sim.reply(cmd, &[]);
    h.interrupt_and_drain();

    let replies = replies.lock().unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].descriptor, desc);
    assert_eq!(replies[0].status, CompletionStatus::Success);
    assert_eq!(replies[0].header.unit(), UnitId::PG);
    assert_eq!(h.engine.slot_state(SeqId(0)), SlotState::Free);

    let stats = h.engine.stats();
    assert_eq!(stats.posted, 1);
    assert_eq!(stats.dispatched, 1);
    assert_eq!(stats.slots_in_use, 0);
}

#[test]
fn test_slots_do_not_leak() {
    let h = Harness::booted();

    for i in 0..300u32 {
        let (replies, callback) = recorder();
        let desc = h
            .engine
            .post(pg_command(), None, None, QueueId::HPQ, Some(callback), 0)
            .unwrap();
        assert_eq!(desc, Descriptor(i));

        let frames = h.sim.take_commands(HPQ);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].seq_id, 0);

        h.sim.reply(&frames[0], &[]);
        h.interrupt_and_drain();
        assert_eq!(replies.lock().unwrap().len(), 1);
    }

    let stats = h.engine.stats();
    assert_eq!(stats.slots_in_use, 0);
    assert_eq!(stats.dispatched, 300);
    // both rings wrapped along the way
    assert!(stats.rewinds >= 2);
}

#[test]
fn test_response_buffer_receives_frame() {
    let h = Harness::booted();
    let (replies, callback) = recorder();

    h.engine
        .post(pg_command(), Some(vec![0; 32]), None, QueueId::LPQ, Some(callback), 0)
        .unwrap();
    let frames = h.sim.take_commands(1);
    h.sim.reply(&frames[0], &[0xde, 0xad, 0xbe, 0xef]);
    h.interrupt_and_drain();

    let replies = replies.lock().unwrap();
    let response = replies[0].response.as_ref().unwrap();
    assert_eq!(&response[..4], &[UnitId::PG.0, 0, 12, 0]);
    assert_eq!(&response[8..12], &[0xde, 0xad, 0xbe, 0xef]);
    assert_eq!(replies[0].body(), &[0xde, 0xad, 0xbe, 0xef]);
}

#[test]
fn test_private_flags_masked() {
    let h = Harness::booted();
    let (replies, callback) = recorder();

    h.engine
        .post(pg_command(), None, None, QueueId::HPQ, Some(callback), 0)
        .unwrap();
    let frames = h.sim.take_commands(HPQ);
    h.sim.post_message(UnitId::PG.0, 0xF1, frames[0].seq_id, &[]);
    h.interrupt_and_drain();

    let replies = replies.lock().unwrap();
    assert_eq!(replies[0].header.ctrl_flags, 0x01);
    assert_eq!(replies[0].frame[1], 0x01);
}

// =============================================================================
// PAYLOADS
// =============================================================================

#[test]
fn test_payload_round_trip() {
    let h = Harness::booted();
    let (replies, callback) = recorder();

    let input: Vec<u8> = (1..=20).collect();
    let echoed: Vec<u8> = input.iter().rev().copied().collect();

    // allocation records at body offsets 4 and 16
    let command = Command::new(UnitId::PERFMON, vec![0; 24]).unwrap();
    let payload = Payload {
        input: PayloadRegion::staged(input.clone(), 4).unwrap(),
        output: PayloadRegion::staged(vec![0; 20], 16).unwrap(),
    };

    h.engine
        .post(command, Some(vec![0; 64]), Some(payload), QueueId::HPQ, Some(callback), 0)
        .unwrap();

    let frames = h.sim.take_commands(HPQ);
    let cmd = &frames[0];
    let (in_size, in_offset) = cmd.payload_alloc(4).unwrap();
    let (out_size, out_offset) = cmd.payload_alloc(16).unwrap();
    assert_eq!((in_size, in_offset), (20, 0x4000));
    assert_eq!((out_size, out_offset), (20, 0x4020));
    assert_eq!(h.sim.dmem_read(in_offset, 20), input);

    // firmware fills the output block, then replies
    h.sim.dmem_write(out_offset, &echoed);
    h.sim.reply(cmd, &[0; 4]);
    h.interrupt_and_drain();

    let replies = replies.lock().unwrap();
    assert_eq!(replies[0].status, CompletionStatus::Success);
    assert_eq!(replies[0].output.as_deref(), Some(&echoed[..]));

    let dmem = h.engine.stats().dmem.unwrap();
    assert_eq!(dmem.allocs, 2);
    assert_eq!(dmem.frees, 2);
}

#[test]
fn test_zero_size_payload_rejected_without_slot_leak() {
    let h = Harness::booted();

    let command = Command::new(UnitId::PERFMON, vec![0; 16]).unwrap();
    let payload = Payload {
        input: PayloadRegion {
            buf: Some(vec![1, 2, 3]),
            offset: 4,
            size: 0,
        },
        output: PayloadRegion::default(),
    };

    assert_eq!(
        h.engine
            .post(command, None, Some(payload), QueueId::HPQ, None, 0),
        Err(Error::InvalidArgument)
    );
    assert_eq!(h.engine.stats().slots_in_use, 0);
    assert_eq!(h.engine.slot_state(SeqId(0)), SlotState::Free);

    // descriptors are not consumed by rejected commands
    assert_eq!(
        h.engine.post(pg_command(), None, None, QueueId::HPQ, None, 0),
        Ok(Descriptor(0))
    );
}

#[test]
fn test_invalid_commands_rejected() {
    let h = Harness::booted();
    let post = |command: Command, response: Option<Vec<u8>>, payload: Option<Payload>, queue| {
        h.engine.post(command, response, payload, queue, None, 0)
    };
    let invalid = Err(Error::InvalidArgument);

    // only software command queues
    assert_eq!(post(pg_command(), None, None, QueueId::HW0), invalid);
    assert_eq!(post(pg_command(), None, None, QueueId::MESSAGE), invalid);

    // larger than half the queue
    let big = Command::new(UnitId::PG, vec![0; 0xf9]).unwrap();
    assert_eq!(post(big, None, None, QueueId::HPQ), invalid);

    // response smaller than a header
    assert_eq!(post(pg_command(), Some(vec![0; 4]), None, QueueId::HPQ), invalid);

    // unit outside the valid ranges
    let unknown = Command::new(UnitId(0x80), vec![]).unwrap();
    assert_eq!(post(unknown, None, None, QueueId::HPQ), invalid);

    // declared size disagrees with the body
    let mut lying = pg_command();
    lying.header.size = 16;
    assert_eq!(post(lying, None, None, QueueId::HPQ), invalid);

    let body = || Command::new(UnitId::PERFMON, vec![0; 16]).unwrap();

    // no buffers at all
    assert_eq!(post(body(), None, Some(Payload::default()), QueueId::HPQ), invalid);

    // record offset without a buffer
    let dangling = Payload {
        input: PayloadRegion::staged(vec![1; 4], 4).unwrap(),
        output: PayloadRegion {
            buf: None,
            offset: 8,
            size: 0,
        },
    };
    assert_eq!(post(body(), None, Some(dangling), QueueId::HPQ), invalid);

    // record would end past the command
    let overrun = Payload {
        input: PayloadRegion::staged(vec![1; 4], 12).unwrap(),
        output: PayloadRegion::default(),
    };
    assert_eq!(post(body(), None, Some(overrun), QueueId::HPQ), invalid);

    assert_eq!(h.engine.stats().slots_in_use, 0);
}

// =============================================================================
// FAILURE PATHS
// =============================================================================

#[test]
fn test_full_queue_times_out_and_leaves_slot_pending() {
    let h = Harness::booted();
    // 0x80 byte frames: three fill the 0x200 ring
    let command = || Command::new(UnitId::PG, vec![0; 0x78]).unwrap();

    for _ in 0..3 {
        h.engine.post(command(), None, None, QueueId::HPQ, None, 0).unwrap();
    }

    let start = h.clock.now_us();
    assert_eq!(
        h.engine.post(command(), None, None, QueueId::HPQ, None, 2),
        Err(Error::Timeout)
    );
    assert_eq!(h.clock.now_us() - start, 2000);
    assert_eq!(h.engine.stats().queue_full_retries, 2);
    assert_eq!(h.engine.slot_state(SeqId(3)), SlotState::Pending);

    // once the firmware catches up the writer wraps to the ring base
    assert_eq!(h.sim.take_commands(HPQ).len(), 3);
    h.engine.post(command(), None, None, QueueId::HPQ, None, 0).unwrap();
    assert_eq!(h.engine.stats().rewinds, 1);

    let frames = h.sim.take_commands(HPQ);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].seq_id, 4);
    assert_eq!(h.sim.reg(regs::queue_head(0)), 0x1080);
}

#[test]
fn test_invalid_unit_dropped_and_drain_continues() {
    let h = Harness::booted();
    let (replies, callback) = recorder();

    h.engine
        .post(pg_command(), None, None, QueueId::HPQ, Some(callback), 0)
        .unwrap();
    let frames = h.sim.take_commands(HPQ);

    h.sim.post_message(0x80, 0, 0, &[1, 2, 3, 4]);
    h.sim.reply(&frames[0], &[]);
    h.interrupt_and_drain();

    assert_eq!(replies.lock().unwrap().len(), 1);
    assert_eq!(h.engine.stats().invalid_frames, 1);
    assert_eq!(h.sim.reg(regs::MSGQ_TAIL), h.sim.reg(regs::MSGQ_HEAD));
}

#[test]
fn test_stale_sequence_ignored() {
    let h = Harness::booted();

    h.sim.post_message(UnitId::PG.0, 0, 42, &[]);
    h.interrupt_and_drain();

    assert_eq!(h.engine.stats().stale, 1);
    assert_eq!(h.engine.slot_state(SeqId(42)), SlotState::Free);
}

#[test]
fn test_unhandled_command() {
    let h = Harness::booted();
    let (replies, callback) = recorder();

    h.engine
        .post(pg_command(), Some(vec![0; 32]), None, QueueId::HPQ, Some(callback), 0)
        .unwrap();
    let frames = h.sim.take_commands(HPQ);
    h.sim.reject(&frames[0]);
    h.interrupt_and_drain();

    let replies = replies.lock().unwrap();
    assert_eq!(replies[0].status, CompletionStatus::Unhandled);
    assert_eq!(replies[0].header.unit(), UnitId::RC);
    // no copy-back
    assert_eq!(replies[0].response.as_deref(), Some(&[0u8; 32][..]));
}

#[test]
fn test_small_response_buffer_drops_response() {
    let h = Harness::booted();
    let (replies, callback) = recorder();

    h.engine
        .post(pg_command(), Some(vec![0; 8]), None, QueueId::HPQ, Some(callback), 0)
        .unwrap();
    let frames = h.sim.take_commands(HPQ);
    h.sim.reply(&frames[0], &[7; 8]);
    h.interrupt_and_drain();

    let replies = replies.lock().unwrap();
    assert_eq!(replies[0].status, CompletionStatus::ResponseDropped);
    assert_eq!(replies[0].response.as_deref(), Some(&[0u8; 8][..]));
    assert_eq!(h.engine.stats().dropped_responses, 1);
}

#[test]
fn test_payload_offset_overflow_rejected() {
    let h = Harness::booted();

    let command = Command::new(UnitId::PERFMON, vec![0; 16]).unwrap();
    let payload = Payload {
        input: PayloadRegion::staged(vec![1; 4], u32::MAX - 3).unwrap(),
        output: PayloadRegion::default(),
    };

    assert_eq!(
        h.engine
            .post(command, None, Some(payload), QueueId::HPQ, None, 0),
        Err(Error::InvalidArgument)
    );
    assert_eq!(h.engine.stats().slots_in_use, 0);
    assert!(h.sim.take_commands(HPQ).is_empty());
}

// =============================================================================
// CANCELLATION / TEARDOWN
// =============================================================================

#[test]
fn test_cancel_suppresses_callback_and_frees_blocks() {
    let h = Harness::booted();
    let (replies, callback) = recorder();

    let command = Command::new(UnitId::PERFMON, vec![0; 16]).unwrap();
    let payload = Payload {
        input: PayloadRegion::staged(vec![9; 12], 4).unwrap(),
        output: PayloadRegion::default(),
    };
    let desc = h
        .engine
        .post(command, None, Some(payload), QueueId::HPQ, Some(callback), 0)
        .unwrap();

    assert_eq!(h.engine.cancel(desc), Ok(()));
    assert_eq!(h.engine.slot_state(SeqId(0)), SlotState::Cancelled);
    assert_eq!(h.engine.cancel(desc), Err(Error::InvalidArgument));
    assert_eq!(h.engine.cancel(Descriptor(99)), Err(Error::InvalidArgument));

    let frames = h.sim.take_commands(HPQ);
    h.sim.reply(&frames[0], &[]);
    h.interrupt_and_drain();

    assert!(replies.lock().unwrap().is_empty());
    assert_eq!(h.engine.slot_state(SeqId(0)), SlotState::Free);

    let stats = h.engine.stats();
    assert_eq!(stats.suppressed, 1);
    let dmem = stats.dmem.unwrap();
    assert_eq!(dmem.allocs, dmem.frees);
}

#[test]
fn test_shutdown_aborts_outstanding_commands() {
    let h = Harness::booted();
    let (replies, callback) = recorder();

    let desc = h
        .engine
        .post(pg_command(), None, None, QueueId::HPQ, Some(callback), 0)
        .unwrap();

    h.engine.shutdown();

    let replies = replies.lock().unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].descriptor, desc);
    assert_eq!(replies[0].status, CompletionStatus::Aborted);

    assert_eq!(h.scheduler.cancelled(), 1);
    assert_eq!(h.engine.state(), EngineState::Off);
    assert!(!h.engine.is_ready());
    assert_eq!(h.engine.stats().slots_in_use, 0);
    assert!(h.engine.stats().dmem.is_none());
    assert_eq!(h.sim.reg(pmc::ENABLE) & pmc::ENABLE_PMU, 0);

    assert_eq!(h.engine.drain(), Err(Error::NotReady));
    assert_eq!(
        h.engine.post(pg_command(), None, None, QueueId::HPQ, None, 0),
        Err(Error::NotReady)
    );
}

// =============================================================================
// INTERRUPTS
// =============================================================================

#[test]
fn test_interrupt_routing() {
    let h = Harness::powered(EngineConfig::default());
    assert_eq!(h.sim.reg(regs::IRQMASK), 0xff);
    assert_eq!(h.sim.reg(pmc::INTR_MASK_0) & pmc::INTR_PMU, pmc::INTR_PMU);

    h.sim.boot(&InitLayout::default());
    h.engine.on_interrupt();
    assert_eq!(h.scheduler.take(), 1);
    assert_eq!(h.sim.reg(regs::IRQSTAT), 0);
    assert_eq!(h.sim.reg(regs::IRQMASK), 0xff);
}

#[test]
fn test_fatal_interrupts_wait_for_drain() {
    let h = Harness::booted();

    h.sim.set_reg(regs::EXTERR_STAT, regs::EXTERR_STAT_VALID);
    h.sim.raise(FalconIrq::FATAL.bits());
    h.engine.on_interrupt();

    assert_eq!(h.scheduler.take(), 0);
    assert_eq!(h.sim.reg(regs::IRQSTAT), 0);
    assert_eq!(h.sim.reg(regs::EXTERR_STAT), 0);
    // masked until the worker runs
    assert_eq!(h.sim.reg(regs::IRQMASK), 0);

    h.engine.drain().unwrap();
    assert_eq!(h.sim.reg(regs::IRQMASK), 0xff);
}

#[test]
fn test_interrupt_ignored_before_init() {
    let h = Harness::booted();
    h.engine.shutdown();

    h.sim.raise(FalconIrq::SWGEN0.bits());
    h.engine.on_interrupt();
    assert_eq!(h.scheduler.take(), 0);
    assert_ne!(h.sim.reg(regs::IRQSTAT), 0);
}

#[test]
fn test_interrupt_not_blocked_by_running_callback() {
    let h = Harness::booted();
    let engine = &h.engine;

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let blocking: Callback = Box::new(move |_| {
        entered_tx.send(()).unwrap();
        release_rx.recv().unwrap();
    });
    let (replies, callback) = recorder();

    engine
        .post(pg_command(), None, None, QueueId::HPQ, Some(blocking), 0)
        .unwrap();
    engine
        .post(pg_command(), None, None, QueueId::HPQ, Some(callback), 0)
        .unwrap();
    let frames = h.sim.take_commands(HPQ);
    h.sim.reply(&frames[0], &[]);
    engine.on_interrupt();
    assert_eq!(h.scheduler.take(), 1);

    thread::scope(|s| {
        let worker = s.spawn(|| engine.drain());
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // next reply arrives while the worker sits in the first callback
        h.sim.reply(&frames[1], &[]);
        let (done_tx, done_rx) = mpsc::channel();
        s.spawn(move || {
            engine.on_interrupt();
            done_tx.send(()).unwrap();
        });
        let returned = done_rx.recv_timeout(Duration::from_secs(5));

        release_tx.send(()).unwrap();
        assert!(returned.is_ok(), "interrupt handler waited for the drain");
        assert_eq!(worker.join().unwrap(), Ok(()));
    });

    assert_eq!(h.scheduler.take(), 1);
    engine.drain().unwrap();
    assert_eq!(replies.lock().unwrap().len(), 1);
    assert_eq!(engine.stats().slots_in_use, 0);
}

// =============================================================================
// CONCURRENCY
// =============================================================================

#[test]
fn test_concurrent_posts_while_draining() {
    const POSTERS: usize = 4;
    const PER_POSTER: usize = 16;
    const TOTAL: usize = POSTERS * PER_POSTER;

    let h = Harness::booted();
    let engine = &h.engine;
    let completed = Arc::new(Mutex::new(Vec::new()));
    let posted = Mutex::new(Vec::new());
    let reused_seq = AtomicBool::new(false);
    let done = AtomicBool::new(false);
    let deadline = Instant::now() + Duration::from_secs(30);

    thread::scope(|s| {
        for poster in 0..POSTERS {
            let completed = completed.clone();
            let posted = &posted;
            s.spawn(move || {
                let queue = if poster % 2 == 0 { QueueId::HPQ } else { QueueId::LPQ };
                for i in 0..PER_POSTER {
                    let sink = completed.clone();
                    let callback: Callback =
                        Box::new(move |reply| sink.lock().unwrap().push(reply.descriptor));

                    let (command, payload) = if i % 4 == 0 {
                        let payload = Payload {
                            input: PayloadRegion::staged(vec![poster as u8; 20], 4).unwrap(),
                            output: PayloadRegion::staged(vec![0; 20], 16).unwrap(),
                        };
                        (Command::new(UnitId::PERFMON, vec![0; 24]).unwrap(), Some(payload))
                    } else {
                        (pg_command(), None)
                    };

                    let response = Some(vec![0; 32]);
                    let desc = engine
                        .post(command, response, payload, queue, Some(callback), 1_000_000)
                        .unwrap();
                    posted.lock().unwrap().push(desc);
                }
            });
        }

        // drain worker
        s.spawn(|| {
            while !done.load(Ordering::Acquire) {
                if h.scheduler.take() > 0 {
                    engine.drain().unwrap();
                } else {
                    thread::yield_now();
                }
            }
        });

        // firmware: answer whatever has been published
        let mut replied = 0;
        while replied < TOTAL && Instant::now() < deadline {
            let mut swept = h.sim.take_commands(0);
            swept.extend(h.sim.take_commands(1));
            if swept.is_empty() {
                thread::yield_now();
                continue;
            }

            // unanswered commands hold distinct slots
            let mut seqs: Vec<u8> = swept.iter().map(|frame| frame.seq_id).collect();
            seqs.sort_unstable();
            seqs.dedup();
            if seqs.len() != swept.len() {
                reused_seq.store(true, Ordering::Relaxed);
            }

            for frame in &swept {
                h.sim.reply(frame, &[]);
            }
            replied += swept.len();
            engine.on_interrupt();
        }

        while completed.lock().unwrap().len() < TOTAL && Instant::now() < deadline {
            thread::yield_now();
        }
        done.store(true, Ordering::Release);
    });

    assert!(!reused_seq.load(Ordering::Relaxed));

    let mut posted = posted.into_inner().unwrap();
    let mut completed = completed.lock().unwrap().clone();
    posted.sort_unstable_by_key(|desc| desc.0);
    completed.sort_unstable_by_key(|desc| desc.0);
    assert_eq!(posted.len(), TOTAL);
    // every descriptor unique and completed exactly once
    assert_eq!(completed, (0..TOTAL as u32).map(Descriptor).collect::<Vec<_>>());
    assert_eq!(posted, completed);

    let stats = engine.stats();
    assert_eq!(stats.posted, TOTAL as u64);
    assert_eq!(stats.dispatched, TOTAL as u64);
    assert_eq!(stats.stale, 0);
    assert_eq!(stats.slots_in_use, 0);
    let dmem = stats.dmem.unwrap();
    assert_eq!(dmem.allocs, (TOTAL / 4 * 2) as u64);
    assert_eq!(dmem.allocs, dmem.frees);
}
