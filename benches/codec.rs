/// Benchmarks for the DODS codec.
use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dapwire::array::DapArray;
use dapwire::codec::{decode_dods, dods_response, ChunkIter, StreamReader};
use dapwire::model::{BaseType, Dataset, Sequence, Value};
use dapwire::models::DType;
use dapwire::types::DValue;

fn array_dataset(size: usize) -> Dataset {
    let data: Vec<f64> = (0..size).map(|i| i as f64 * 0.5).collect();
    let var = BaseType::new("x", DType::Float64, vec![size])
        .with_data(DapArray::from_vec(&[size], data).unwrap());
    Dataset::new("bench").with(var)
}

fn sequence_dataset(records: usize) -> Dataset {
    let rows = (0..records)
        .map(|i| {
            vec![
                Value::Atom(DValue::Int(i as i64)),
                Value::Atom(DValue::Float(i as f64 / 3.0)),
                Value::Atom(DValue::Str(format!("station {}", i % 17))),
            ]
        })
        .collect();
    let seq = Sequence::new("obs")
        .with(BaseType::new("n", DType::Int32, vec![]))
        .with(BaseType::new("t", DType::Float64, vec![]))
        .with(BaseType::new("name", DType::String, vec![]))
        .with_records(rows);
    Dataset::new("bench").with(seq)
}

fn chunked(payload: &Bytes, chunk_size: usize) -> ChunkIter {
    let chunks: Vec<_> = payload
        .chunks(chunk_size)
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect();
    Box::new(chunks.into_iter())
}

fn criterion_benchmark(c: &mut Criterion) {
    for size_k in [64, 256, 1024] {
        let dataset = array_dataset(size_k * 1024);
        c.bench_function(&format!("encode array({}k)", size_k), |b| {
            b.iter(|| dods_response(black_box(&dataset)).unwrap())
        });
        let payload = dods_response(&dataset).unwrap();
        for chunk_size in [4096, 65536] {
            c.bench_function(&format!("decode array({}k, {})", size_k, chunk_size), |b| {
                b.iter(|| {
                    let mut reader = StreamReader::new(chunked(&payload, chunk_size));
                    decode_dods(black_box(&mut reader)).unwrap()
                })
            });
        }
    }
    for records in [1000, 10000] {
        let dataset = sequence_dataset(records);
        c.bench_function(&format!("encode sequence({})", records), |b| {
            b.iter(|| dods_response(black_box(&dataset)).unwrap())
        });
        let payload = dods_response(&dataset).unwrap();
        c.bench_function(&format!("decode sequence({})", records), |b| {
            b.iter(|| {
                let mut reader = StreamReader::new(chunked(&payload, 65536));
                decode_dods(black_box(&mut reader)).unwrap()
            })
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
