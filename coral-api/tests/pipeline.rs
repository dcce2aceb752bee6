//! End-to-end: documents inserted through the storage engine flow through a
//! query plan instantiated over the same database.

use coral_api::DatabaseBlockEnv;
use coral_query::ast::{AstNode, BinaryOp};
use coral_query::executor::{ExecutionBlock, ExecutionState};
use coral_query::plan::{ExecutionPlan, NodeBody, PlanNode};
use coral_query::query::QueryContext;
use coral_query::registers::Variable;
use coral_storage::OperationOptions;
use coral_test_utils::{doc, TestEngine};
use coral_txn::TransactionHints;
use serde_json::json;
use std::sync::Arc;

fn filter_plan(collection: &str, threshold: i64) -> ExecutionPlan {
    ExecutionPlan::new(
        vec![
            PlanNode {
                id: 1,
                dependencies: vec![],
                body: NodeBody::SingletonNode,
            },
            PlanNode {
                id: 2,
                dependencies: vec![1],
                body: NodeBody::EnumerateCollectionNode {
                    collection: collection.to_string(),
                    out_variable: Variable::new(1, "doc"),
                },
            },
            PlanNode {
                id: 3,
                dependencies: vec![2],
                body: NodeBody::CalculationNode {
                    expression: AstNode::BinaryOp {
                        op: BinaryOp::Gt,
                        lhs: Box::new(AstNode::AttributeAccess {
                            object: Box::new(AstNode::reference(1)),
                            attribute: "value".into(),
                        }),
                        rhs: Box::new(AstNode::constant(json!(threshold))),
                    },
                    out_variable: Variable::new(2, "cond"),
                },
            },
            PlanNode {
                id: 4,
                dependencies: vec![3],
                body: NodeBody::FilterNode { in_variable: 2 },
            },
        ],
        4,
    )
}

#[test]
fn query_pipeline_reads_stored_documents() {
    let fixture = TestEngine::new();
    let collection = fixture.collection("users");
    for i in 0..10 {
        let mut trx = collection.begin_transaction(TransactionHints::SINGLE_OPERATION);
        collection
            .insert(&mut trx, &doc(&format!("k{}", i), i), &OperationOptions::default())
            .expect("insert");
        trx.commit().expect("commit");
    }

    let plan = filter_plan("users", 6);
    let register_plan = plan.build_register_plan().expect("register plan");
    let env = DatabaseBlockEnv::new(Arc::clone(&fixture.database), true);
    let ctx = QueryContext::new();
    let mut root = plan
        .instantiate(plan.root, &env, &ctx, &register_plan)
        .expect("instantiate");

    let mut seen = Vec::new();
    loop {
        let (state, block) = root.get_some(3).expect("get_some");
        if let Some(block) = block {
            let register = register_plan.register_for(1).expect("doc register");
            for row in 0..block.num_rows() {
                let value = block.value(row, register).as_json()["value"]
                    .as_i64()
                    .expect("value attribute");
                seen.push(value);
            }
        }
        if state == ExecutionState::Done {
            break;
        }
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![7, 8, 9], "documents with value > 6");
}

#[test]
fn query_pipeline_unknown_collection_fails() {
    let fixture = TestEngine::new();
    let plan = filter_plan("missing", 0);
    let register_plan = plan.build_register_plan().expect("register plan");
    let env = DatabaseBlockEnv::new(Arc::clone(&fixture.database), true);
    let ctx = QueryContext::new();
    let err = plan
        .instantiate(plan.root, &env, &ctx, &register_plan)
        .expect_err("missing collection");
    assert!(err.is(coral_core::ErrorCode::CollectionNotFound));
}
