use cart_vm::allocator::Allocator;
use cart_vm::config::PAGE_SIZE;
use cart_vm::gc::GcMark;
use cart_vm::table::{Key, Table};
use cart_vm::{Heap, Scalar, Value};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

pub fn allocator(c: &mut Criterion) {
    c.bench_function("allocator/churn", |b| {
        let mut allocator = Allocator::new(PAGE_SIZE);
        b.iter(|| {
            let blocks = (1..64).map(|size| allocator.allocate(size * 8).unwrap()).collect::<Vec<_>>();
            for block in blocks.into_iter().rev() {
                allocator.free(block);
            }
        });
    });
}

pub fn collect(c: &mut Criterion) {
    c.bench_function("gc/sweep_strings", |b| {
        let mut heap = Heap::default();
        b.iter(|| {
            let kept = heap.alloc_str("kept").unwrap();
            for i in 0..256 {
                heap.alloc_str(format!("garbage{i}")).unwrap();
            }
            heap.mark(kept);
            heap.trace();
            black_box(heap.sweep());
        });
    });
}

pub fn table(c: &mut Criterion) {
    let heap = Heap::default();
    let keys = (0..1024).map(|i| Key::new(&heap, Scalar::Int(i)).unwrap()).collect::<Vec<_>>();

    c.bench_function("table/insert", |b| {
        b.iter(|| {
            let mut table = Table::default();
            for &key in &keys {
                table.insert(key, Value::TRUE);
            }
            black_box(table.len())
        });
    });

    let mut table = Table::default();
    for &key in &keys {
        table.insert(key, Value::TRUE);
    }
    c.bench_function("table/get", |b| {
        b.iter(|| keys.iter().filter(|key| table.get(key).is_some()).count());
    });
}

criterion_group!(benches, allocator, collect, table);
criterion_main!(benches);
