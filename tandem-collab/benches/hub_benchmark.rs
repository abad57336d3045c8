use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tandem_collab::presence::PermissionLevel;
use tandem_collab::protocol::{AppliedOperation, Command, Envelope, MessageType};
use tandem_collab::room::RoomRegistry;
use tandem_collab::session::{ClientHandle, Identity};
use tandem_ot::Operation;

fn identity(user_id: u64) -> Identity {
    Identity {
        user_id,
        username: format!("user{user_id}"),
        permission: PermissionLevel::Editor,
    }
}

fn bench_decode_operation(c: &mut Criterion) {
    let text = r#"{"type":"operation","roomId":"p1","data":{"operations":[{"type":"insert","position":12,"text":"hello"},{"type":"delete","position":3,"count":2}],"baseVersion":41,"resourceId":7}}"#;

    c.bench_function("decode_operation_command", |b| {
        b.iter(|| black_box(Command::decode(black_box(text)).unwrap()))
    });
}

fn bench_encode_broadcast(c: &mut Criterion) {
    let payload = AppliedOperation {
        operations: vec![Operation::insert(12, "hello"), Operation::delete(3, 2)],
        version: 42,
        resource_id: 7,
    };

    c.bench_function("encode_operation_frame", |b| {
        b.iter(|| {
            let env = Envelope::new(MessageType::Operation)
                .in_room("p1")
                .from_user(1, "alice")
                .with_data(black_box(&payload));
            black_box(env.frame().unwrap());
        })
    });
}

fn bench_fanout_100_members(c: &mut Criterion) {
    let mut registry = RoomRegistry::new(500, 100);
    let mut receivers = Vec::new();
    for user_id in 0..100 {
        let (client, rx) = ClientHandle::new(identity(user_id), 1024);
        registry.join("room", client);
        receivers.push(rx);
    }
    let frame = Envelope::new(MessageType::Operation).frame().unwrap();

    c.bench_function("fanout_100_members", |b| {
        b.iter(|| {
            let fanout = registry.broadcast("room", black_box(&frame), Some(0));
            for rx in receivers.iter_mut() {
                while rx.try_recv().is_ok() {}
            }
            black_box(fanout);
        })
    });
}

criterion_group!(benches, bench_decode_operation, bench_encode_broadcast, bench_fanout_100_members);
criterion_main!(benches);
