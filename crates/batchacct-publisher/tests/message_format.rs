//! End-to-end message rendering for a grid job row.

use batchacct_common::schema::TableRegistry;
use batchacct_common::value::SqlValue;
use batchacct_publisher::config::PublisherConfig;
use batchacct_publisher::fields::{apel_fields, DeriveContext, FieldSet};
use batchacct_publisher::join::MESSAGE_HEADER;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;

#[test]
fn grid_job_renders_complete_message() {
    let cfg = PublisherConfig {
        site: "EXAMPLE-SITE".into(),
        cluster: "ce.example.org".into(),
        unit: "HEPSPEC".into(),
        factor_constant: 250.0,
        fields: vec![],
        bunch: 1000,
    };
    let registry = TableRegistry::standard().unwrap();
    let set = FieldSet::new(apel_fields(&cfg), &registry).unwrap();
    let mut ctx = DeriveContext::new(cfg.factor_constant, HashMap::new());

    let start = Utc.timestamp_opt(1_000, 0).unwrap();
    let end = Utc.timestamp_opt(8_200, 0).unwrap();
    let row = vec![
        SqlValue::Text("ce01.example.org:8443/cream-pbs-grid".into()), // SubmitHost
        SqlValue::Int(314),                                            // job_id
        SqlValue::Int(2),                                              // idx
        SqlValue::Null,                                                // charged_saap
        SqlValue::Text("/atlas/Role=production /atlas".into()),        // user_fqan
        SqlValue::Timestamp(end),
        SqlValue::Timestamp(start),
        SqlValue::Double(100.0), // ru_utime
        SqlValue::Double(44.5),  // ru_stime
        SqlValue::Int(8),        // num_processors
        SqlValue::Int(1),        // num_ex_hosts
        SqlValue::Timestamp(start),
        SqlValue::Timestamp(end),
        SqlValue::Int(2048),
        SqlValue::Int(4096),
        SqlValue::Double(1.5),                                  // host_factor
        SqlValue::Text("/atlas/Role=production /atlas".into()), // user_fqan again
        SqlValue::Int(314),                                     // engine job_id
        SqlValue::Timestamp(end),                               // engine event_time
    ];

    let mut msg = String::from(MESSAGE_HEADER);
    set.render(&mut ctx, &row, &mut msg).unwrap();

    let expected = "APEL-individual-job-message: v1.1\n\
                    Site: EXAMPLE-SITE\n\
                    SubmitHost: ce01.example.org:8443/cream-pbs-grid\n\
                    LocalJobId: 314-2\n\
                    FQAN: /atlas/Role=production;/atlas\n\
                    WallDuration: 7200\n\
                    CpuDuration: 144\n\
                    Processors: 8\n\
                    NodeCount: 1\n\
                    StartTime: 1000\n\
                    EndTime: 8200\n\
                    MemoryReal: 2048\n\
                    MemoryVirtual: 4096\n\
                    ServiceLevelType: HEPSPEC\n\
                    ServiceLevel: 375\n\
                    Infrastructure: grid\n";
    assert_eq!(msg, expected);
}
