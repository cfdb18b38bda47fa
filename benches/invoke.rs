//! Marshaling benchmarks
//!
//! Measures cache construction and the per-call cost of the Invoker for
//! scalar, string, array and callback signatures.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gimarshal::*;
use std::sync::Arc;

fn scalar_info() -> CallableInfo {
    CallableInfo::function("Bench", "add")
        .arg(ArgInfo::new("a", TypeTag::Int32))
        .arg(ArgInfo::new("b", TypeTag::Int32))
        .returns(TypeTag::Int32, Transfer::Nothing)
}

fn array_info() -> CallableInfo {
    CallableInfo::function("Bench", "sum")
        .arg(ArgInfo::new(
            "values",
            TypeDescriptor::c_array(TypeTag::Int32.into(), ArrayLength::Indexed(1)),
        ))
        .arg(ArgInfo::new("n_values", TypeTag::UInt32))
        .returns(TypeTag::Int64, Transfer::Nothing)
}

fn callback_info() -> CallableInfo {
    let signature = CallableInfo::callback("Bench", "Func")
        .arg(ArgInfo::new("value", TypeTag::Int32))
        .arg(ArgInfo::new("data", TypeDescriptor::pointer()).with_closure(1));
    CallableInfo::function("Bench", "call_once")
        .arg(ArgInfo::new("func", TypeDescriptor::interface(InterfaceInfo::Callback(Arc::new(signature)))).with_closure(1))
        .arg(ArgInfo::new("user_data", TypeDescriptor::pointer()))
}

fn setup() -> Invoker {
    let table = Arc::new(FunctionTable::new());
    table.register("bench_add", |frame| {
        let sum = frame.arg(0).to_integer(TypeTag::Int32) + frame.arg(1).to_integer(TypeTag::Int32);
        NativeArg::from_integer(TypeTag::Int32, sum)
    });
    table.register("bench_sum", |frame| {
        let n = frame.arg(1).to_integer(TypeTag::UInt32) as usize;
        let values = unsafe { std::slice::from_raw_parts(frame.arg(0).pointer() as *const i32, n) };
        NativeArg::from_integer(TypeTag::Int64, values.iter().map(|v| *v as i128).sum())
    });
    table.register("bench_strlen", |frame| {
        let bytes = unsafe { gimarshal::core::memory::c_str_bytes(frame.arg(0).pointer()) };
        NativeArg::from_integer(TypeTag::UInt64, bytes.len() as i128)
    });
    table.register("bench_call_once", |frame| {
        let _ = frame.call_callback(frame.arg(0), &[NativeArg::from_integer(TypeTag::Int32, 1), frame.arg(1)]);
        NativeArg::zeroed()
    });
    Invoker::new(MarshalEnv::new(table))
}

fn bench_cache_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_build");

    let scalar = scalar_info();
    group.bench_function("scalar", |b| b.iter(|| CallableCache::build(black_box(&scalar))));

    let array = array_info();
    group.bench_function("array_with_length", |b| b.iter(|| CallableCache::build(black_box(&array))));

    let callback = callback_info();
    group.bench_function("callback", |b| b.iter(|| CallableCache::build(black_box(&callback))));

    let registry = CacheRegistry::new();
    group.bench_function("registry_hit", |b| b.iter(|| registry.get_or_build(black_box(&callback))));

    group.finish();
}

fn bench_invoke(c: &mut Criterion) {
    let invoker = setup();
    let mut group = c.benchmark_group("invoke");

    let scalar = CallableCache::build(&scalar_info()).unwrap();
    let args = [Value::Int(40), Value::Int(2)];
    group.bench_function("scalar", |b| b.iter(|| invoker.invoke(&scalar, None, black_box(&args))));

    let strlen = CallableCache::build(
        &CallableInfo::function("Bench", "strlen")
            .arg(ArgInfo::new("text", TypeTag::Utf8))
            .returns(TypeTag::UInt64, Transfer::Nothing),
    )
    .unwrap();
    let text = [Value::str("the quick brown fox")];
    group.bench_function("utf8", |b| b.iter(|| invoker.invoke(&strlen, None, black_box(&text))));

    let sum = CallableCache::build(&array_info()).unwrap();
    for size in [4usize, 64, 1024] {
        let values = [Value::list((0..size as i128).map(Value::Int))];
        group.bench_with_input(BenchmarkId::new("array", size), &values, |b, values| {
            b.iter(|| invoker.invoke(&sum, None, black_box(values)))
        });
    }

    let call_once = CallableCache::build(&callback_info()).unwrap();
    let callable = [Value::function("noop", |_| Ok(Value::None))];
    group.bench_function("callback", |b| b.iter(|| invoker.invoke(&call_once, None, black_box(&callable))));

    group.finish();
}

criterion_group!(benches, bench_cache_build, bench_invoke);
criterion_main!(benches);
