//! Integration tests driving the fabric through separate mappings of the
//! same region, the way unrelated processes would.

use shmq::{MAX_RETRIES, Op, SharedRegion, Status, Task};
use std::thread;
use std::time::Duration;

#[test]
fn submit_complete_round_trip() {
    let name = format!("/shmq_ipc_rt_{}", std::process::id());

    unsafe {
        let server = SharedRegion::<u32, u32>::create(&name).unwrap();

        let name_clone = name.clone();
        let client_thread = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            let client = SharedRegion::<u32, u32>::open(&name_clone).unwrap();

            for task_id in 1..=100u32 {
                client.table().reset(task_id);
                let task = Task {
                    op: Op::Set {
                        key: task_id,
                        value: task_id * 10,
                    },
                    client_pid: std::process::id(),
                    task_id,
                };
                assert!(client.ring().try_push(task, MAX_RETRIES));

                let slot = client.table().slot(task_id);
                while !slot.is_complete() {
                    thread::sleep(Duration::from_micros(100));
                }
                assert_eq!(slot.status(), Status::Success);
            }
        });

        // Serve: echo every set back as success.
        let mut served = 0;
        while served < 100 {
            match server.ring().try_pop(MAX_RETRIES) {
                Some(task) => {
                    assert_eq!(task.op.value(), Some(task.op.key() * 10));
                    server.table().slot(task.task_id).publish(Status::Success, None);
                    served += 1;
                }
                None => thread::sleep(Duration::from_micros(100)),
            }
        }

        client_thread.join().unwrap();
    }
}

#[test]
fn value_visible_after_completion() {
    let name = format!("/shmq_ipc_vis_{}", std::process::id());

    unsafe {
        let server = SharedRegion::<u32, u64>::create(&name).unwrap();

        let name_clone = name.clone();
        let client_thread = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            let client = SharedRegion::<u32, u64>::open(&name_clone).unwrap();

            client.table().reset(5);
            let task = Task {
                op: Op::Get { key: 99 },
                client_pid: std::process::id(),
                task_id: 5,
            };
            assert!(client.ring().try_push(task, MAX_RETRIES));

            let slot = client.table().slot(5);
            while !slot.is_complete() {
                std::hint::spin_loop();
            }
            // The release publish makes the value visible to this acquire
            // observer.
            assert_eq!(slot.status(), Status::Success);
            assert_eq!(slot.value(), 0xCAFE_F00D);
        });

        loop {
            if let Some(task) = server.ring().try_pop(MAX_RETRIES) {
                assert_eq!(task.op.key(), 99);
                server
                    .table()
                    .slot(task.task_id)
                    .publish(Status::Success, Some(0xCAFE_F00D));
                break;
            }
            std::hint::spin_loop();
        }

        client_thread.join().unwrap();
    }
}

#[test]
fn ring_full_backpressure_across_mappings() {
    let name = format!("/shmq_ipc_full_{}", std::process::id());

    unsafe {
        let server = SharedRegion::<u32, u32>::create(&name).unwrap();
        let client = SharedRegion::<u32, u32>::open(&name).unwrap();

        let task = |task_id: u32| Task {
            op: Op::<u32, u32>::Get { key: task_id },
            client_pid: std::process::id(),
            task_id,
        };

        // capacity - 1 submissions fit; the reserved slot keeps full and
        // empty distinguishable.
        for id in 0..(shmq::QUEUE_CAPACITY - 1) as u32 {
            assert!(client.ring().try_push(task(id), MAX_RETRIES));
        }
        assert!(!client.ring().try_push(task(9999), MAX_RETRIES));
        assert!(server.ring().is_full());

        assert!(server.ring().try_pop(MAX_RETRIES).is_some());
        assert!(client.ring().try_push(task(9999), MAX_RETRIES));
    }
}

#[test]
fn version_observed_across_mappings() {
    let name = format!("/shmq_ipc_version_{}", std::process::id());

    unsafe {
        let server = SharedRegion::<u32, u32>::create(&name).unwrap();
        let client = SharedRegion::<u32, u32>::open(&name).unwrap();

        assert_eq!(server.ring().version(), 0);
        client.ring().push(Task {
            op: Op::Get { key: 1 },
            client_pid: std::process::id(),
            task_id: 1,
        });
        assert_eq!(server.ring().version(), 1);
        server.ring().pop();
        assert_eq!(client.ring().version(), 2);
    }
}
