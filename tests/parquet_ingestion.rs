use std::sync::Arc;

use parquet::column::writer::ColumnWriter;
use parquet::data_type::ByteArray;
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::parser::parse_message_type;

use tabular_etl_worker::ingestion::parquet::read_parquet_from_bytes;
use tabular_etl_worker::job::{BlobRef, LoadMessage};
use tabular_etl_worker::stages::{load, StageContext, StaticFetcher};
use tabular_etl_worker::store::{BlobStore, MemoryBlobStore};
use tabular_etl_worker::types::{DataType, Value};

fn people_parquet(id_as_binary: bool) -> Vec<u8> {
    let schema_str = if id_as_binary {
        r#"
        message schema {
          REQUIRED BINARY id (UTF8);
          REQUIRED BINARY name (UTF8);
          REQUIRED DOUBLE score;
          REQUIRED BOOLEAN active;
        }
        "#
    } else {
        r#"
        message schema {
          REQUIRED INT64 id;
          REQUIRED BINARY name (UTF8);
          REQUIRED DOUBLE score;
          REQUIRED BOOLEAN active;
        }
        "#
    };

    let schema = Arc::new(parse_message_type(schema_str).unwrap());
    let props = Arc::new(WriterProperties::builder().build());
    let mut buf: Vec<u8> = Vec::new();
    let mut writer = SerializedFileWriter::new(&mut buf, schema, props).unwrap();

    let mut rg = writer.next_row_group().unwrap();
    let mut col_idx: usize = 0;
    while let Some(mut col) = rg.next_column().unwrap() {
        match col.untyped() {
            ColumnWriter::Int64ColumnWriter(w) => {
                w.write_batch(&[1_i64, 2_i64], None, None).unwrap();
            }
            ColumnWriter::ByteArrayColumnWriter(w) => {
                // With a binary id, col0 is `id` and col1 is `name`.
                if id_as_binary && col_idx == 0 {
                    w.write_batch(&[ByteArray::from("a-1"), ByteArray::from("a-2")], None, None)
                        .unwrap();
                } else {
                    w.write_batch(&[ByteArray::from("Ada"), ByteArray::from("Grace")], None, None)
                        .unwrap();
                }
            }
            ColumnWriter::DoubleColumnWriter(w) => {
                w.write_batch(&[98.5_f64, 87.25_f64], None, None).unwrap();
            }
            ColumnWriter::BoolColumnWriter(w) => {
                w.write_batch(&[true, false], None, None).unwrap();
            }
            _ => panic!("unexpected column writer in test"),
        }
        col.close().unwrap();
        col_idx += 1;
    }
    rg.close().unwrap();
    writer.close().unwrap();
    buf
}

#[test]
fn parquet_types_follow_physical_column_types() {
    let ds = read_parquet_from_bytes(people_parquet(false)).unwrap();

    let types: Vec<DataType> = ds.schema.fields.iter().map(|f| f.data_type).collect();
    assert_eq!(
        types,
        vec![DataType::Int64, DataType::Utf8, DataType::Float64, DataType::Bool]
    );
    assert_eq!(ds.row_count(), 2);
    assert_eq!(ds.rows[0][0], Value::Int64(1));
    assert_eq!(ds.rows[0][1], Value::Utf8("Ada".to_string()));
    assert_eq!(ds.rows[1][3], Value::Bool(false));
}

#[test]
fn binary_key_column_is_read_as_text() {
    let ds = read_parquet_from_bytes(people_parquet(true)).unwrap();
    assert_eq!(ds.schema.fields[0].data_type, DataType::Utf8);
    assert_eq!(ds.rows[1][0], Value::Utf8("a-2".to_string()));
}

#[tokio::test]
async fn load_stage_exports_parquet_as_csv() {
    let blobs = Arc::new(MemoryBlobStore::new());
    blobs
        .put("lake", "landing/people.parquet", people_parquet(false), "application/octet-stream")
        .await
        .unwrap();
    let ctx = StageContext::new(blobs.clone(), Arc::new(StaticFetcher::new()));
    let msg = LoadMessage {
        job_id: "pq-1".into(),
        input: BlobRef::new("lake", "landing"),
        output: BlobRef::new("lake", "loaded"),
    };

    let result = load::run(&ctx, &msg).await.unwrap();

    let location = result["loaded"][0].as_str().unwrap();
    let key = location.strip_prefix("lake/").unwrap();
    let written = String::from_utf8(blobs.get("lake", key).await.unwrap()).unwrap();
    assert_eq!(written, "id,name,score,active\n1,Ada,98.5,True\n2,Grace,87.25,False\n");
    assert_eq!(result["features"][3]["type"], "str");
}

#[test]
#[ignore]
fn parquet_perf_smoke_test() {
    use std::time::Instant;

    // Run with: `cargo test -- --ignored`
    let schema_str = r#"
    message schema {
      REQUIRED INT64 id;
      REQUIRED DOUBLE score;
    }
    "#;
    let schema = Arc::new(parse_message_type(schema_str).unwrap());
    let props = Arc::new(WriterProperties::builder().build());
    let mut buf: Vec<u8> = Vec::new();
    let mut writer = SerializedFileWriter::new(&mut buf, schema, props).unwrap();
    let mut rg = writer.next_row_group().unwrap();

    let n: usize = 100_000;
    let ids: Vec<i64> = (0..n as i64).collect();
    let scores: Vec<f64> = (0..n).map(|i| (i % 100) as f64).collect();
    while let Some(mut col) = rg.next_column().unwrap() {
        match col.untyped() {
            ColumnWriter::Int64ColumnWriter(w) => {
                w.write_batch(&ids, None, None).unwrap();
            }
            ColumnWriter::DoubleColumnWriter(w) => {
                w.write_batch(&scores, None, None).unwrap();
            }
            _ => panic!("unexpected column writer in perf test"),
        }
        col.close().unwrap();
    }
    rg.close().unwrap();
    writer.close().unwrap();

    let start = Instant::now();
    let ds = read_parquet_from_bytes(buf).unwrap();
    eprintln!("read {} rows in {:?}", ds.row_count(), start.elapsed());
}
