//! Structural CFG edits checked against the graph invariants and against analyses
//! recomputed from scratch.

use vmopt::{compiler::CleanupPass, prelude::*};

type DominatorTree = Vec<(BlockId, Option<BlockId>, Vec<BlockId>)>;
type LoopShape = (BlockId, Vec<BlockId>, Vec<BlockId>, Option<BlockId>, u32);

fn dominator_tree(graph: &Graph) -> DominatorTree {
    let mut tree: DominatorTree = graph
        .blocks()
        .map(|b| {
            let mut dominated = graph.block(b).dominated().to_vec();
            dominated.sort();
            (b, graph.block(b).dominator(), dominated)
        })
        .collect();
    tree.sort();
    tree
}

fn loop_shapes(graph: &Graph) -> Vec<LoopShape> {
    let mut shapes: Vec<LoopShape> = graph
        .loops()
        .filter(|l| !l.is_root())
        .filter_map(|l| {
            let header = l.header()?;
            let mut blocks = l.blocks().to_vec();
            blocks.sort();
            let mut back_edges = l.back_edges().to_vec();
            back_edges.sort();
            Some((header, blocks, back_edges, l.preheader(), l.depth()))
        })
        .collect();
    shapes.sort();
    shapes
}

/// Recomputes dominators and asserts the cached tree was already correct.
fn assert_dominators_match_recompute(graph: &mut Graph) -> Result<()> {
    assert!(graph.is_valid(AnalysisKind::Dominators));
    let patched = dominator_tree(graph);
    graph.force_recompute(AnalysisKind::Dominators)?;
    assert_eq!(patched, dominator_tree(graph), "\n{}", graph.dump());
    Ok(())
}

fn only_loop(graph: &Graph) -> LoopId {
    match graph.loops().find(|l| !l.is_root()).map(Loop::id) {
        Some(lp) => lp,
        None => panic!("no loop in\n{}", graph.dump()),
    }
}

#[test]
fn test_split_block_after_moves_tail_and_edges() -> Result<()> {
    let mut built = GraphBuilder::new().build_with(|f| {
        let x = f.param(0, DataType::Int64);
        let one = f.int(1);
        let (a, b) = f.block(1, &[2], |b| {
            let a = b.add(x, one);
            (a, b.mul(a, a))
        });
        let phi = f.block(2, &[EXIT], |b| {
            let phi = b.phi(DataType::Int64, &[]);
            b.ret(phi);
            phi
        });
        f.phi_inputs(phi, &[(1, b)]);
        (a, b, phi)
    })?;
    let (a, b, phi) = built.values;
    let (b1, b2) = (built.block(1), built.block(2));
    let graph = &mut built.graph;
    graph.ensure(AnalysisKind::Dominators)?;

    let tail = graph.split_block_after(a, true);

    assert_eq!(graph.inst(b).block(), Some(tail));
    assert_eq!(graph.block(b1).last_inst(), Some(a));
    assert_eq!(graph.block(b1).succs(), &[tail]);
    assert_eq!(graph.block(tail).succs(), &[b2]);
    assert_eq!(graph.block(b2).preds(), &[tail]);
    assert_eq!(graph.inst(phi).inputs(), &[b]);
    GraphChecker::new(graph).check()?;
    assert_dominators_match_recompute(graph)
}

#[test]
fn test_duplicate_successor_gets_synthetic_block() -> Result<()> {
    let mut built = GraphBuilder::new().build_with(|f| {
        f.block(1, &[2], |_| ());
        f.block(2, &[EXIT], |b| b.ret_void());
    })?;
    let (b1, b2) = (built.block(1), built.block(2));
    let graph = &mut built.graph;

    let synthetic = graph.add_successor(b1, b2, true);

    assert_ne!(synthetic, b1);
    assert_eq!(graph.block(b1).succs(), &[b2, synthetic]);
    assert!(graph.block(synthetic).is_empty());
    assert_eq!(graph.block(synthetic).succs(), &[b2]);
    assert_eq!(graph.block(b2).preds(), &[b1, synthetic]);
    Ok(())
}

#[test]
#[should_panic(expected = "duplicate edge")]
fn test_duplicate_successor_without_permission_panics() {
    let Ok(mut built) = GraphBuilder::new().build_with(|f| {
        f.block(1, &[2], |_| ());
        f.block(2, &[EXIT], |b| b.ret_void());
    }) else {
        return;
    };
    let (b1, b2) = (built.block(1), built.block(2));
    built.graph.add_successor(b1, b2, false);
}

#[test]
fn test_insert_block_between_keeps_phi_slots() -> Result<()> {
    let mut built = GraphBuilder::new().build_with(|f| {
        let x = f.param(0, DataType::Int64);
        let zero = f.int(0);
        let one = f.int(1);
        f.block(1, &[2, 3], |b| b.if_cmp(ConditionCode::Lt, x, zero));
        f.block(2, &[3], |_| ());
        f.block(3, &[EXIT], |b| {
            let phi = b.phi(DataType::Int64, &[(1, x), (2, one)]);
            b.ret(phi);
            phi
        })
    })?;
    let phi = built.values;
    let (b1, b2, b3) = (built.block(1), built.block(2), built.block(3));
    let graph = &mut built.graph;
    graph.ensure(AnalysisKind::Dominators)?;
    let inputs = graph.inst(phi).inputs().to_vec();

    let middle = graph.insert_block_between(b1, b3);

    assert_eq!(graph.block(b1).succs(), &[b2, middle]);
    assert_eq!(graph.block(b3).preds(), &[middle, b2]);
    assert_eq!(graph.inst(phi).inputs(), inputs.as_slice());
    assert_eq!(graph.block(middle).dominator(), Some(b1));
    GraphChecker::new(graph).check()?;
    assert_dominators_match_recompute(graph)
}

/// Removing an empty merge block whose phi feeds the successor's phi.
#[test]
fn test_remove_empty_block_merges_phi_inputs() -> Result<()> {
    let mut built = GraphBuilder::new().build_with(|f| {
        let x = f.param(0, DataType::Int64);
        let zero = f.int(0);
        let one = f.int(1);
        let c4 = f.int(4);
        let c5 = f.int(5);
        let c6 = f.int(6);
        f.block(1, &[2, 3], |b| b.if_cmp(ConditionCode::Lt, x, zero));
        f.block(2, &[4, 5], |b| b.if_cmp(ConditionCode::Gt, x, one));
        f.block(3, &[6, 9], |b| b.if_cmp(ConditionCode::Eq, x, c4));
        f.block(4, &[7], |_| ());
        f.block(5, &[7], |_| ());
        f.block(6, &[7], |_| ());
        let e = f.block(7, &[8], |b| {
            b.phi(DataType::Int64, &[(4, c4), (5, c5), (6, c6)])
        });
        f.block(9, &[8], |_| ());
        let p = f.block(8, &[EXIT], |b| {
            let p = b.phi(DataType::Int64, &[(7, e), (9, one)]);
            b.ret(p);
            p
        });
        (e, p, [one, c4, c5, c6])
    })?;
    let (e, p, [one, c4, c5, c6]) = built.values;
    let [b4, b5, b6, b7, b8, b9] = [4, 5, 6, 7, 8, 9].map(|n| built.block(n));
    let graph = &mut built.graph;
    graph.ensure(AnalysisKind::Loops)?;
    assert_eq!(graph.block(b8).preds(), &[b7, b9]);
    assert!(graph.can_remove_empty_block(b7));

    assert!(graph.remove_empty_block(b7, false));

    assert!(!graph.contains_block(b7));
    assert!(!graph.contains_inst(e));
    assert_eq!(graph.block(b8).preds(), &[b4, b9, b5, b6]);
    assert_eq!(graph.inst(p).inputs(), &[c4, one, c5, c6]);
    for pred in [b4, b5, b6] {
        assert_eq!(graph.block(pred).succs(), &[b8]);
    }
    GraphChecker::new(graph).check()?;
    assert_dominators_match_recompute(graph)
}

#[test]
fn test_remove_empty_block_in_loop_matches_recompute() -> Result<()> {
    let mut built = GraphBuilder::new().build_with(|f| {
        let n = f.param(0, DataType::Int64);
        let zero = f.int(0);
        let one = f.int(1);
        f.block(1, &[2], |_| ());
        let i = f.block(2, &[3, 5], |b| {
            let i = b.phi(DataType::Int64, &[]);
            b.if_cmp(ConditionCode::Lt, i, n);
            i
        });
        f.block(3, &[4], |_| ());
        let next = f.block(4, &[2], |b| b.add(i, one));
        f.block(5, &[EXIT], |b| b.ret(i));
        f.phi_inputs(i, &[(1, zero), (4, next)]);
    })?;
    let (b2, b3, b4) = (built.block(2), built.block(3), built.block(4));
    let graph = &mut built.graph;
    graph.ensure(AnalysisKind::Loops)?;
    let lp = only_loop(graph);
    assert!(graph.is_block_in_loop(b3, lp));

    assert!(graph.remove_empty_block(b3, false));
    assert!(graph.is_valid(AnalysisKind::Loops));
    assert!(graph.is_valid(AnalysisKind::Dominators));
    assert!(!graph.is_valid(AnalysisKind::Rpo));
    assert_eq!(graph.block(b4).dominator(), Some(b2));
    GraphChecker::new(graph).check()?;

    let patched = loop_shapes(graph);
    let patched_dominators = dominator_tree(graph);
    graph.force_recompute(AnalysisKind::Loops)?;
    assert_eq!(patched, loop_shapes(graph), "\n{}", graph.dump());
    assert_eq!(patched_dominators, dominator_tree(graph));
    Ok(())
}

#[test]
fn test_remove_empty_block_with_hint_drops_loops() -> Result<()> {
    let mut built = GraphBuilder::new().build_with(|f| {
        let n = f.param(0, DataType::Int64);
        let zero = f.int(0);
        let one = f.int(1);
        f.block(1, &[2], |_| ());
        let i = f.block(2, &[3, 5], |b| {
            let i = b.phi(DataType::Int64, &[]);
            b.if_cmp(ConditionCode::Lt, i, n);
            i
        });
        f.block(3, &[4], |_| ());
        let next = f.block(4, &[2], |b| b.add(i, one));
        f.block(5, &[EXIT], |b| b.ret(i));
        f.phi_inputs(i, &[(1, zero), (4, next)]);
    })?;
    let b3 = built.block(3);
    let graph = &mut built.graph;
    graph.ensure(AnalysisKind::Loops)?;

    assert!(!graph.remove_empty_block(b3, true));
    assert!(!graph.is_valid(AnalysisKind::Loops));
    GraphChecker::new(graph).check()
}

#[test]
fn test_join_successor_block() -> Result<()> {
    let mut built = GraphBuilder::new().build_with(|f| {
        let x = f.param(0, DataType::Int64);
        let one = f.int(1);
        let a = f.block(1, &[2], |b| b.add(x, one));
        let ret = f.block(2, &[EXIT], |b| b.ret(a));
        (a, ret)
    })?;
    let (a, ret) = built.values;
    let (b1, b2) = (built.block(1), built.block(2));
    let end = built.block(EXIT);
    let graph = &mut built.graph;
    graph.ensure(AnalysisKind::Loops)?;

    graph.join_successor_block(b1);

    assert!(!graph.contains_block(b2));
    assert_eq!(graph.insts(b1).collect::<Vec<_>>(), vec![a, ret]);
    assert_eq!(graph.block(b1).succs(), &[end]);
    assert_eq!(graph.block(end).preds(), &[b1]);
    GraphChecker::new(graph).check()?;
    assert_dominators_match_recompute(graph)
}

#[test]
fn test_remove_unreachable_blocks() -> Result<()> {
    let mut built = GraphBuilder::new().build_with(|f| {
        let x = f.param(0, DataType::Int64);
        let zero = f.int(0);
        let one = f.int(1);
        let branch = f.block(1, &[2, 3], |b| b.if_cmp(ConditionCode::Ne, x, zero));
        f.block(2, &[EXIT], |b| b.ret(x));
        f.block(3, &[EXIT], |b| b.ret(one));
        branch
    })?;
    let branch = built.values;
    let (b1, b2, b3) = (built.block(1), built.block(2), built.block(3));
    let end = built.block(EXIT);
    let graph = &mut built.graph;

    graph.remove_inst(branch);
    graph.remove_edge(b1, b3);
    assert_eq!(graph.remove_unreachable_blocks(), 1);

    assert!(!graph.contains_block(b3));
    assert_eq!(graph.block(end).preds(), &[b2]);
    assert_eq!(graph.remove_unreachable_blocks(), 0);
    GraphChecker::new(graph).check()
}

#[test]
fn test_cleanup_keeps_loops_when_latch_is_bypassed() -> Result<()> {
    let mut built = GraphBuilder::new().build_with(|f| {
        let n = f.param(0, DataType::Int64);
        let zero = f.int(0);
        let one = f.int(1);
        f.block(1, &[2], |_| ());
        let i = f.block(2, &[3, 5], |b| {
            let i = b.phi(DataType::Int64, &[]);
            b.if_cmp(ConditionCode::Lt, i, n);
            i
        });
        let next = f.block(3, &[4], |b| b.add(i, one));
        f.block(4, &[2], |_| ());
        f.block(5, &[EXIT], |b| b.ret(i));
        f.phi_inputs(i, &[(1, zero), (4, next)]);
    })?;
    let (b3, latch) = (built.block(3), built.block(4));
    let graph = &mut built.graph;
    graph.ensure(AnalysisKind::Loops)?;

    assert!(CleanupPass::new().run(graph, &CompilerContext::default())?);

    assert!(!graph.contains_block(latch));
    assert!(graph.is_valid(AnalysisKind::Dominators));
    assert!(graph.is_valid(AnalysisKind::Loops));
    let lp = only_loop(graph);
    assert_eq!(graph.get_loop(lp).back_edges(), &[b3]);
    GraphChecker::new(graph).check()?;

    let kept = loop_shapes(graph);
    graph.force_recompute(AnalysisKind::Loops)?;
    assert_eq!(kept, loop_shapes(graph), "\n{}", graph.dump());
    Ok(())
}
