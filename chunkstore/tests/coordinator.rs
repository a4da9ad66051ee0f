#![allow(missing_docs)]

use std::sync::Arc;

use chunkstore::{
    Bucket, ChunkCoordinator, ChunkError, ChunkId, CompoundField, Config, DataType, DatasetDescriptor,
    ElementCodec, FilterDeclaration, NumericType, Partition, RawElementCodec, SelectionError, ShuffleMode,
    StorageError, StoreMetadataSource,
};
use chunkstore_storage::{
    storage_adapter::{
        performance_metrics::PerformanceMetricsStorageAdapter, read_only::ReadOnlyStorageAdapter,
    },
    store::MemoryStore,
    AsyncChunkStorageTraits, Bytes, StoreKey,
};
use serde_json::json;

const DATASET_UUID: &str = "0f3c6d1e-5b7a-4c2d-9e8f-a1b2c3d4e5f6";

fn chunk_id(indices: &str) -> String {
    format!("c-{DATASET_UUID}_{indices}")
}

fn chunk_key(indices: &str) -> Result<StoreKey, Box<dyn std::error::Error>> {
    Ok(StoreKey::new(format!("db/{DATASET_UUID}/{indices}"))?)
}

struct Fixture {
    memory: Arc<MemoryStore>,
    metrics: Arc<PerformanceMetricsStorageAdapter<MemoryStore>>,
    metadata: Arc<StoreMetadataSource>,
    coordinator: ChunkCoordinator,
    bucket: Bucket,
}

impl Fixture {
    async fn new(
        descriptor: impl FnOnce(DatasetDescriptor) -> DatasetDescriptor,
        data_type: DataType,
        chunk_shape: Vec<u64>,
        config: Config,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let memory = Arc::new(MemoryStore::new());
        let metrics = Arc::new(PerformanceMetricsStorageAdapter::new(memory.clone()));
        let metadata = Arc::new(StoreMetadataSource::new(memory.clone(), 16));
        let coordinator = ChunkCoordinator::builder(metrics.clone(), metadata.clone())
            .config(config)
            .build();
        let bucket = Bucket::from("mybucket");
        let dataset_id = ChunkId::new(&chunk_id("0"))?.dataset_id();
        let descriptor = descriptor(DatasetDescriptor::new(dataset_id, data_type, chunk_shape));
        metadata.put_dataset(&bucket, &descriptor).await?;
        Ok(Self {
            memory,
            metrics,
            metadata,
            coordinator,
            bucket,
        })
    }

    async fn simple(data_type: DataType, chunk_shape: Vec<u64>) -> Result<Self, Box<dyn std::error::Error>> {
        Self::new(|descriptor| descriptor, data_type, chunk_shape, Config::default()).await
    }
}

fn stocks_type() -> DataType {
    DataType::compound(vec![
        CompoundField::new("symbol", DataType::fixed_string(4)),
        CompoundField::new("volume", DataType::integer(NumericType::UInt32)),
    ])
}

fn stocks_payload() -> Result<Bytes, Box<dyn std::error::Error>> {
    let data_type = stocks_type();
    let mut payload = Vec::new();
    for row in [json!(["AAPL", 10]), json!(["GE", 20]), json!(["AAPL", 30]), json!(["IBM", 40])] {
        payload.extend(data_type.encode_value(&row)?);
    }
    Ok(payload.into())
}

async fn stocks() -> Result<Fixture, Box<dyn std::error::Error>> {
    let fixture = Fixture::simple(stocks_type(), vec![4]).await?;
    fixture
        .coordinator
        .write(&fixture.bucket, &chunk_id("0"), None, stocks_payload()?, None, None)
        .await?;
    Ok(fixture)
}

#[tokio::test]
async fn coordinator_write_read() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = Fixture::simple(DataType::integer(NumericType::Int32), vec![4, 4]).await?;
    let id = chunk_id("0_1");

    let payload: Vec<u8> = [1i32, 2, 3, 4].iter().flat_map(|v| v.to_le_bytes()).collect();
    let outcome = fixture
        .coordinator
        .write(&fixture.bucket, &id, Some("[0:2,:]"), payload.clone().into(), Some(4), None)
        .await?;
    assert!(outcome.changed);
    assert!(outcome.persisted);
    assert!(fixture.memory.keys(&fixture.bucket).contains(&chunk_key("0_1")?));

    let output = fixture.coordinator.read(&fixture.bucket, &id, None, None).await?;
    assert_eq!(output.shape, vec![4, 4]);
    let values = output.buffer.to_values()?;
    assert_eq!(values[..8], [1, 2, 3, 4, 1, 2, 3, 4].map(|v| json!(v)));
    assert!(values[8..].iter().all(|value| value == &json!(0)));

    let output = fixture
        .coordinator
        .read(&fixture.bucket, &id, Some("[[0,1,3],2]"), None)
        .await?;
    assert_eq!(output.shape, vec![3, 1]);
    assert_eq!(output.buffer.to_values()?, vec![json!(3), json!(3), json!(0)]);

    // unchanged elements are not persisted
    fixture.metrics.reset();
    let outcome = fixture
        .coordinator
        .write(&fixture.bucket, &id, Some("[1,:]"), payload.into(), None, None)
        .await?;
    assert!(!outcome.changed);
    assert!(!outcome.persisted);
    assert_eq!(fixture.metrics.writes(), 0);
    Ok(())
}

#[tokio::test]
async fn coordinator_write_zero_chunks() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::default();
    config.set_write_zero_chunks(true);
    let fixture = Fixture::new(|d| d, DataType::integer(NumericType::UInt8), vec![4], config).await?;
    let id = chunk_id("0");
    fixture
        .coordinator
        .write(&fixture.bucket, &id, None, vec![0u8; 4].into(), None, None)
        .await?;
    let outcome = fixture
        .coordinator
        .write(&fixture.bucket, &id, None, vec![0u8; 4].into(), None, None)
        .await?;
    assert!(!outcome.changed);
    assert!(outcome.persisted);
    assert_eq!(fixture.metrics.writes(), 2);
    Ok(())
}

#[tokio::test]
async fn coordinator_write_invalid_payload() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = Fixture::simple(DataType::integer(NumericType::UInt16), vec![4]).await?;
    let id = chunk_id("0");
    let result = fixture
        .coordinator
        .write(&fixture.bucket, &id, Some("[0:2]"), vec![1u8, 2, 3].into(), None, None)
        .await;
    assert!(matches!(
        result,
        Err(ChunkError::PayloadSizeMismatch {
            expected: 4,
            actual: 3
        })
    ));
    let result = fixture
        .coordinator
        .write(&fixture.bucket, &id, Some("[0:4]"), vec![0u8; 6].into(), Some(3), None)
        .await;
    assert!(matches!(
        result,
        Err(ChunkError::Selection(SelectionError::BroadcastError { .. }))
    ));
    let result = fixture
        .coordinator
        .write(&fixture.bucket, &id, Some("[0:5]"), vec![0u8; 10].into(), None, None)
        .await;
    assert!(matches!(
        result,
        Err(ChunkError::Selection(SelectionError::OutOfRange { .. }))
    ));
    // request errors never reach the store
    assert_eq!(fixture.metrics.reads(), 0);
    assert_eq!(fixture.metrics.writes(), 0);
    Ok(())
}

#[tokio::test]
async fn coordinator_variable_length() -> Result<(), Box<dyn std::error::Error>> {
    let data_type = DataType::variable_string();
    let fixture = Fixture::simple(data_type.clone(), vec![3]).await?;
    let id = chunk_id("2");
    let payload = [data_type.encode_value(&json!("hello"))?, data_type.encode_value(&json!(""))?].concat();
    fixture
        .coordinator
        .write(&fixture.bucket, &id, Some("[0:2]"), payload.into(), None, None)
        .await?;
    let output = fixture.coordinator.read(&fixture.bucket, &id, None, None).await?;
    assert_eq!(output.buffer.to_values()?, vec![json!("hello"), json!(""), json!("")]);
    Ok(())
}

#[tokio::test]
async fn coordinator_admission_control() -> Result<(), Box<dyn std::error::Error>> {
    testing_logger::setup();
    let mut config = Config::default();
    config.set_chunk_cache_size(64).set_min_chunk_size(128);
    let fixture = Fixture::new(|d| d, DataType::integer(NumericType::UInt8), vec![16], config).await?;
    let id = chunk_id("0");

    let result = fixture
        .coordinator
        .write(&fixture.bucket, &id, None, vec![1u8; 16].into(), None, None)
        .await;
    let Err(err) = result else {
        panic!("the write was admitted");
    };
    assert!(err.is_retryable());
    assert!(matches!(
        err,
        ChunkError::CapacityExceeded {
            mem_free: 64,
            min_chunk_size: 128
        }
    ));
    let result = fixture
        .coordinator
        .write_points(&fixture.bucket, &id, &[3], vec![1u8].into())
        .await;
    assert!(matches!(result, Err(ChunkError::CapacityExceeded { .. })));

    // no fetch and no mutation
    assert_eq!(fixture.metrics.reads(), 0);
    assert_eq!(fixture.metrics.writes(), 0);
    assert!(!fixture.memory.keys(&fixture.bucket).contains(&chunk_key("0")?));
    assert!(!fixture.coordinator.chunk_cache().contains(&fixture.bucket, &ChunkId::new(&id)?));

    testing_logger::validate(|captured_logs| {
        let warnings: Vec<_> = captured_logs
            .iter()
            .filter(|log| log.level == log::Level::Warn)
            .collect();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].body.starts_with(&format!("rejected update of chunk {id}")));
    });

    // reads are not subject to admission control
    let result = fixture.coordinator.read(&fixture.bucket, &id, None, None).await;
    assert!(matches!(result, Err(ChunkError::ChunkNotFound(_))));
    assert_eq!(fixture.metrics.reads(), 1);
    Ok(())
}

#[tokio::test]
async fn coordinator_read_initializer() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = Fixture::simple(DataType::integer(NumericType::UInt8), vec![2, 2]).await?;
    let result = fixture
        .coordinator
        .read(&fixture.bucket, &chunk_id("0_0"), None, None)
        .await;
    assert!(matches!(result, Err(ChunkError::ChunkNotFound(_))));
    let result = fixture
        .coordinator
        .read_points(&fixture.bucket, &chunk_id("0_0"), &[0, 0], None)
        .await;
    assert!(matches!(result, Err(ChunkError::ChunkNotFound(_))));
    assert_eq!(fixture.metrics.writes(), 0);

    let fixture = Fixture::new(
        |descriptor| {
            descriptor
                .with_fill_value(json!(7))
                .with_initializer(vec!["chunk_initializer".to_string(), "--ramp".to_string()])
        },
        DataType::integer(NumericType::UInt8),
        vec![2, 2],
        Config::default(),
    )
    .await?;
    let output = fixture
        .coordinator
        .read(&fixture.bucket, &chunk_id("0_0"), Some("[1,:]"), None)
        .await?;
    assert_eq!(output.buffer.to_values()?, vec![json!(7), json!(7)]);
    // the initialised chunk is persisted by the read
    assert_eq!(fixture.metrics.writes(), 1);
    assert_eq!(
        fixture.memory.get(&fixture.bucket, &chunk_key("0_0")?).await?,
        Some(Bytes::from_static(&[7, 7, 7, 7]))
    );

    // an invalid request does not initialise a chunk
    let result = fixture
        .coordinator
        .read_points(&fixture.bucket, &chunk_id("1_0"), &[2, 0], None)
        .await;
    assert!(matches!(result, Err(ChunkError::InvalidCoordinate { .. })));
    assert_eq!(fixture.metrics.writes(), 1);
    Ok(())
}

#[tokio::test]
async fn coordinator_points() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = Fixture::simple(DataType::integer(NumericType::UInt8), vec![3, 3]).await?;
    let id = chunk_id("0_0");

    // point writes always initialise
    let outcome = fixture
        .coordinator
        .write_points(&fixture.bucket, &id, &[0, 0, 2, 1], vec![5u8, 6].into())
        .await?;
    assert!(outcome.changed);
    assert!(outcome.persisted);

    let output = fixture
        .coordinator
        .read_points(&fixture.bucket, &id, &[2, 1, 0, 0, 1, 1], None)
        .await?;
    assert_eq!(output.shape, vec![3]);
    assert_eq!(output.buffer.to_values()?, vec![json!(6), json!(5), json!(0)]);

    let result = fixture
        .coordinator
        .read_points(&fixture.bucket, &id, &[3, 0], None)
        .await;
    assert!(matches!(result, Err(ChunkError::InvalidCoordinate { .. })));
    let result = fixture
        .coordinator
        .write_points(&fixture.bucket, &id, &[0, 0, 1], vec![1u8].into())
        .await;
    assert!(matches!(result, Err(ChunkError::InvalidCoordinate { .. })));
    let result = fixture
        .coordinator
        .write_points(&fixture.bucket, &id, &[0, 0, 1, 1], vec![1u8].into())
        .await;
    assert!(matches!(
        result,
        Err(ChunkError::PayloadSizeMismatch {
            expected: 2,
            actual: 1
        })
    ));
    Ok(())
}

#[tokio::test]
async fn coordinator_query_read() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = stocks().await?;
    let id = chunk_id("0");

    let result = fixture
        .coordinator
        .query_read(&fixture.bucket, &id, None, "symbol == b'AAPL'", 0, None)
        .await?;
    assert_eq!(result.indices, vec![0, 2]);
    assert_eq!(
        result.rows.to_values()?,
        vec![json!(["AAPL", 10]), json!(["AAPL", 30])]
    );

    let result = fixture
        .coordinator
        .query_read(&fixture.bucket, &id, Some("[1:4]"), "volume >= 20 where symbol != 'x'", 2, None)
        .await?;
    assert_eq!(result.indices, vec![1, 2]);

    let result = fixture
        .coordinator
        .query_read(&fixture.bucket, &id, None, "symbol == 'MSFT'", 0, None)
        .await;
    assert!(matches!(result, Err(ChunkError::NotFound { .. })));

    for query in ["where volume > 1", "volume >", "price > 1"] {
        let result = fixture
            .coordinator
            .query_read(&fixture.bucket, &id, None, query, 0, None)
            .await;
        assert!(
            matches!(result, Err(ChunkError::InvalidPredicate(_))),
            "{query}"
        );
    }
    Ok(())
}

#[tokio::test]
async fn coordinator_query_write() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = stocks().await?;
    let id = chunk_id("0");

    // zero matches leaves the chunk clean and persists nothing
    fixture.metrics.reset();
    let output = fixture
        .coordinator
        .query_write(&fixture.bucket, &id, None, "symbol == 'MSFT'", 0, &json!({"volume": 0}))
        .await?;
    assert!(output.result.is_empty());
    assert!(!output.persisted);
    assert_eq!(fixture.metrics.writes(), 0);

    let output = fixture
        .coordinator
        .query_write(&fixture.bucket, &id, None, "symbol == 'AAPL'", 1, &json!({"volume": 0}))
        .await?;
    assert_eq!(output.result.indices, vec![0]);
    assert!(output.persisted);
    assert_eq!(fixture.metrics.writes(), 1);

    let output = fixture
        .coordinator
        .read(&fixture.bucket, &id, Some("[0:3]"), Some(&["volume".to_string()]))
        .await?;
    assert_eq!(
        output.buffer.to_values()?,
        vec![json!([0]), json!([20]), json!([30])]
    );

    for update in [json!({}), json!({"price": 1}), json!({"volume": "x"})] {
        let result = fixture
            .coordinator
            .query_write(&fixture.bucket, &id, None, "symbol == 'AAPL'", 0, &update)
            .await;
        assert!(matches!(result, Err(ChunkError::InvalidQueryUpdate(_))));
    }
    Ok(())
}

#[tokio::test]
async fn coordinator_query_unsupported() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = Fixture::simple(DataType::integer(NumericType::UInt8), vec![4]).await?;
    let result = fixture
        .coordinator
        .query_read(&fixture.bucket, &chunk_id("0"), None, "value > 1", 0, None)
        .await;
    assert!(matches!(result, Err(ChunkError::UnsupportedQuery(_))));
    Ok(())
}

#[tokio::test]
async fn coordinator_fields() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = stocks().await?;
    let id = chunk_id("0");
    let fields = ["volume".to_string(), "symbol".to_string()];
    let output = fixture
        .coordinator
        .read_points(&fixture.bucket, &id, &[3], Some(&fields))
        .await?;
    assert_eq!(output.buffer.to_values()?, vec![json!([40, "IBM"])]);

    let result = fixture
        .coordinator
        .read(&fixture.bucket, &id, None, Some(&["price".to_string()]))
        .await;
    assert!(matches!(result, Err(ChunkError::InvalidFields(_))));
    Ok(())
}

#[tokio::test]
async fn coordinator_write_fields() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = stocks().await?;
    let id = chunk_id("0");
    let fields = ["volume".to_string()];
    let volume = DataType::integer(NumericType::UInt32);
    let mut payload = Vec::new();
    for value in [json!(50), json!(60)] {
        payload.extend(volume.encode_value(&value)?);
    }
    let outcome = fixture
        .coordinator
        .write(&fixture.bucket, &id, Some("[1:3]"), payload.into(), None, Some(&fields))
        .await?;
    assert!(outcome.changed);
    assert!(outcome.persisted);
    let output = fixture.coordinator.read(&fixture.bucket, &id, None, None).await?;
    assert_eq!(
        output.buffer.to_values()?,
        vec![
            json!(["AAPL", 10]),
            json!(["GE", 50]),
            json!(["AAPL", 60]),
            json!(["IBM", 40])
        ]
    );

    // a payload element is broadcast and the symbol field is left alone
    let outcome = fixture
        .coordinator
        .write(&fixture.bucket, &id, None, volume.encode_value(&json!(40))?.into(), Some(1), Some(&fields))
        .await?;
    assert!(outcome.changed);
    let output = fixture
        .coordinator
        .read(&fixture.bucket, &id, None, Some(&["symbol".to_string()]))
        .await?;
    assert_eq!(
        output.buffer.to_values()?,
        vec![json!(["AAPL"]), json!(["GE"]), json!(["AAPL"]), json!(["IBM"])]
    );

    // the payload is sized by the projected type and checked before the chunk is fetched
    fixture.metrics.reset();
    let result = fixture
        .coordinator
        .write(&fixture.bucket, &id, Some("[0:2]"), stocks_payload()?, None, Some(&fields))
        .await;
    assert!(matches!(
        result,
        Err(ChunkError::PayloadSizeMismatch {
            expected: 8,
            actual: 32
        })
    ));
    let result = fixture
        .coordinator
        .write(&fixture.bucket, &id, None, vec![0u8; 16].into(), None, Some(&["price".to_string()]))
        .await;
    assert!(matches!(result, Err(ChunkError::InvalidFields(_))));
    assert_eq!(fixture.metrics.writes(), 0);
    Ok(())
}

#[tokio::test]
async fn coordinator_query_read_fields() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = stocks().await?;
    let id = chunk_id("0");
    let fields = ["volume".to_string()];
    let result = fixture
        .coordinator
        .query_read(&fixture.bucket, &id, None, "symbol == 'AAPL'", 0, Some(&fields))
        .await?;
    assert_eq!(result.indices, vec![0, 2]);
    assert_eq!(result.rows.to_values()?, vec![json!([10]), json!([30])]);

    let result = fixture
        .coordinator
        .query_read(&fixture.bucket, &id, None, "symbol == 'AAPL'", 0, Some(&["price".to_string()]))
        .await;
    assert!(matches!(result, Err(ChunkError::InvalidFields(_))));
    Ok(())
}

#[tokio::test]
async fn coordinator_persist_failure_retried() -> Result<(), Box<dyn std::error::Error>> {
    let memory = Arc::new(MemoryStore::new());
    let read_only = Arc::new(ReadOnlyStorageAdapter::new(memory.clone()));
    let metadata = Arc::new(StoreMetadataSource::new(memory.clone(), 16));
    let coordinator = ChunkCoordinator::builder(read_only.clone(), metadata.clone()).build();
    let bucket = Bucket::from("mybucket");
    let id = chunk_id("0");
    let chunk = ChunkId::new(&id)?;
    let descriptor = DatasetDescriptor::new(chunk.dataset_id(), DataType::integer(NumericType::UInt8), vec![4]);
    metadata.put_dataset(&bucket, &descriptor).await?;

    coordinator
        .write(&bucket, &id, None, vec![1u8, 2, 3, 4].into(), None, None)
        .await?;

    read_only.set_read_only(true);
    let result = coordinator
        .write(&bucket, &id, Some("[0]"), vec![9u8].into(), None, None)
        .await;
    assert!(matches!(
        result,
        Err(ChunkError::PersistFailed {
            source: StorageError::ReadOnly,
            ..
        })
    ));
    assert!(coordinator.chunk_cache().is_pending(&bucket, &chunk));
    assert_eq!(
        memory.get(&bucket, &chunk_key("0")?).await?,
        Some(Bytes::from_static(&[1, 2, 3, 4]))
    );

    // the next fetch reattempts persistence first
    let result = coordinator.read(&bucket, &id, None, None).await;
    assert!(matches!(result, Err(ChunkError::PersistFailed { .. })));
    assert!(coordinator.chunk_cache().is_pending(&bucket, &chunk));

    read_only.set_read_only(false);
    let output = coordinator.read(&bucket, &id, None, None).await?;
    assert_eq!(
        output.buffer.to_values()?,
        vec![json!(9), json!(2), json!(3), json!(4)]
    );
    assert!(!coordinator.chunk_cache().is_pending(&bucket, &chunk));
    assert_eq!(
        memory.get(&bucket, &chunk_key("0")?).await?,
        Some(Bytes::from_static(&[9, 2, 3, 4]))
    );
    Ok(())
}

#[tokio::test]
async fn coordinator_filters() -> Result<(), Box<dyn std::error::Error>> {
    let filters = vec![
        FilterDeclaration::known("shuffle").ok_or("unknown filter")?,
        FilterDeclaration::known("deflate").ok_or("unknown filter")?.with_level(9),
    ];
    let fixture = Fixture::new(
        |descriptor| descriptor.with_filters(filters),
        DataType::integer(NumericType::UInt16),
        vec![4],
        Config::default(),
    )
    .await?;
    let id = chunk_id("0");

    let first = fixture
        .coordinator
        .filter_ops(&fixture.bucket, &id)
        .await?
        .ok_or("no filter operations")?;
    let second = fixture
        .coordinator
        .filter_ops(&fixture.bucket, &id)
        .await?
        .ok_or("no filter operations")?;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.shuffle, ShuffleMode::Byte);
    let compressor = first.compressor.as_ref().ok_or("no compressor")?;
    assert_eq!(compressor.name, "zlib");
    assert_eq!(compressor.level, 9);

    // chunks are stored byte shuffled
    let payload: Vec<u8> = [1u16, 2, 3, 4].iter().flat_map(|v| v.to_le_bytes()).collect();
    fixture
        .coordinator
        .write(&fixture.bucket, &id, None, payload.into(), None, None)
        .await?;
    let stored = fixture
        .memory
        .get(&fixture.bucket, &chunk_key("0")?)
        .await?
        .ok_or("chunk not stored")?;
    assert_eq!(stored.as_ref(), &[1, 2, 3, 4, 0, 0, 0, 0]);
    let decoded = RawElementCodec::new().decode(&stored, &DataType::integer(NumericType::UInt16), &[4], Some(first.as_ref()))?;
    assert_eq!(decoded.to_values()?, [1, 2, 3, 4].map(|v| json!(v)));

    // deleting a chunk forgets the filters of its dataset
    let dataset_id = ChunkId::new(&id)?.dataset_id();
    assert!(fixture.coordinator.filter_resolver().contains(&dataset_id));
    fixture.coordinator.delete(&fixture.bucket, &id).await?;
    assert!(!fixture.coordinator.filter_resolver().contains(&dataset_id));
    Ok(())
}

#[tokio::test]
async fn coordinator_filters_none_not_memoized() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = Fixture::simple(DataType::integer(NumericType::UInt8), vec![4]).await?;
    let id = chunk_id("0");
    let dataset_id = ChunkId::new(&id)?.dataset_id();
    assert!(fixture.coordinator.filter_ops(&fixture.bucket, &id).await?.is_none());
    assert!(!fixture.coordinator.filter_resolver().contains(&dataset_id));

    // filters declared later are resolved
    let descriptor = DatasetDescriptor::new(dataset_id.clone(), DataType::integer(NumericType::UInt8), vec![4])
        .with_filters(vec![FilterDeclaration::known("lz4").ok_or("unknown filter")?]);
    fixture.metadata.put_dataset(&fixture.bucket, &descriptor).await?;
    let filters = fixture
        .coordinator
        .filter_ops(&fixture.bucket, &id)
        .await?
        .ok_or("no filter operations")?;
    assert_eq!(filters.shuffle, ShuffleMode::None);
    assert_eq!(filters.compressor.as_ref().map(|c| c.name.as_str()), Some("lz4"));
    assert!(fixture.coordinator.filter_resolver().contains(&dataset_id));
    Ok(())
}

#[tokio::test]
async fn coordinator_delete() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = Fixture::simple(DataType::integer(NumericType::UInt8), vec![4]).await?;
    let id = chunk_id("0");
    let chunk = ChunkId::new(&id)?;
    fixture
        .coordinator
        .write(&fixture.bucket, &id, None, vec![1u8; 4].into(), None, None)
        .await?;
    assert!(fixture.coordinator.chunk_cache().contains(&fixture.bucket, &chunk));

    fixture.coordinator.delete(&fixture.bucket, &id).await?;
    assert!(!fixture.coordinator.chunk_cache().contains(&fixture.bucket, &chunk));
    assert!(!fixture.memory.exists(&fixture.bucket, &chunk_key("0")?).await?);
    // absence is not an error
    fixture.coordinator.delete(&fixture.bucket, &id).await?;

    let result = fixture.coordinator.read(&fixture.bucket, &id, None, None).await;
    assert!(matches!(result, Err(ChunkError::ChunkNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn coordinator_paginate() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::default();
    config.set_max_request_size(30);
    let fixture = Fixture::new(|d| d, DataType::integer(NumericType::UInt8), vec![100], config).await?;
    let id = chunk_id("0");

    let pages = fixture.coordinator.paginate(&fixture.bucket, &id, None).await?;
    let pages: Vec<String> = pages.iter().map(ToString::to_string).collect();
    assert_eq!(pages, ["[0:25]", "[25:50]", "[50:75]", "[75:100]"]);

    let pages = fixture
        .coordinator
        .paginate(&fixture.bucket, &id, Some("[10:20]"))
        .await?;
    assert_eq!(pages.len(), 1);
    Ok(())
}

#[tokio::test]
async fn coordinator_paginate_read() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::default();
    config.set_max_request_size(5);
    let fixture = Fixture::new(|d| d, DataType::integer(NumericType::UInt8), vec![10, 10], config).await?;
    let id = chunk_id("0");
    let payload: Vec<u8> = (0..100).collect();
    fixture
        .coordinator
        .write(&fixture.bucket, &id, None, payload.into(), None, None)
        .await?;

    for (selection, page_count) in [("[[1,3,5],0:10:3]", 3), ("[0:10:3,[1,3,5]]", 4)] {
        let pages = fixture
            .coordinator
            .paginate(&fixture.bucket, &id, Some(selection))
            .await?;
        assert_eq!(pages.len(), page_count, "{selection}");
        let mut paged = Vec::new();
        for page in &pages {
            let output = fixture
                .coordinator
                .read(&fixture.bucket, &id, Some(&page.to_string()), None)
                .await?;
            assert!(output.buffer.size() <= 5, "{page}");
            paged.extend(output.buffer.to_values()?);
        }
        let output = fixture
            .coordinator
            .read(&fixture.bucket, &id, Some(selection), None)
            .await?;
        assert_eq!(paged, output.buffer.to_values()?, "{selection}");
    }
    Ok(())
}

#[tokio::test]
async fn coordinator_identity() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = Fixture::simple(DataType::integer(NumericType::UInt8), vec![4, 4]).await?;

    let result = fixture.coordinator.read(&fixture.bucket, "c-xyz_0_0", None, None).await;
    assert!(matches!(result, Err(ChunkError::InvalidChunkId(_))));
    // one index for a two dimensional dataset
    let result = fixture.coordinator.read(&fixture.bucket, &chunk_id("0"), None, None).await;
    assert!(matches!(result, Err(ChunkError::InvalidChunkId(_))));
    let result = fixture
        .coordinator
        .read(&fixture.bucket, "c-11111111-2222-3333-4444-555555555555_0_0", None, None)
        .await;
    assert!(matches!(result, Err(ChunkError::DatasetNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn coordinator_partition() -> Result<(), Box<dyn std::error::Error>> {
    let id = chunk_id("0");
    let owner = Partition::owner(&ChunkId::new(&id)?, 2);
    let mut config = Config::default();
    config.set_partition(Partition::new(1 - owner, 2));
    let fixture = Fixture::new(|d| d, DataType::integer(NumericType::UInt8), vec![4], config).await?;

    let result = fixture
        .coordinator
        .write(&fixture.bucket, &id, None, vec![1u8; 4].into(), None, None)
        .await;
    assert!(matches!(result, Err(ChunkError::NotInPartition { .. })));
    assert!(matches!(
        fixture.coordinator.delete(&fixture.bucket, &id).await,
        Err(ChunkError::NotInPartition { .. })
    ));
    assert_eq!(fixture.metrics.writes(), 0);
    Ok(())
}
