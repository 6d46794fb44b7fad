//! End-to-end scenarios over small methods: branch elimination, loop shape queries,
//! liveness across loops and loop cloning.

use vmopt::{analysis::IntervalId, compiler::BranchElimPass, prelude::*};

fn loop_with_header(graph: &Graph, header: BlockId) -> LoopId {
    match graph
        .loops()
        .find(|l| !l.is_root() && l.header() == Some(header))
        .map(Loop::id)
    {
        Some(lp) => lp,
        None => panic!("no loop headed by {header} in\n{}", graph.dump()),
    }
}

fn assert_intervals_well_formed(liveness: &Liveness) {
    for interval in liveness.intervals() {
        for range in interval.ranges() {
            assert!(range.begin < range.end, "empty range in {interval:?}");
        }
        for pair in interval.ranges().windows(2) {
            assert!(pair[0].end <= pair[1].begin, "unsorted ranges in {interval:?}");
        }
        for pair in interval.use_positions().windows(2) {
            assert!(pair[0] <= pair[1], "unsorted uses in {interval:?}");
        }
    }
}

/// `do { next = i + 1 } while (next < n)` spread over three blocks, returning `next`.
fn three_block_do_while() -> Result<BuiltGraph<(InstId, InstId, InstId)>> {
    GraphBuilder::new().build_with(|f| {
        let n = f.param(0, DataType::Int64);
        let zero = f.int(0);
        let one = f.int(1);
        f.block(1, &[2], |_| ());
        let i = f.block(2, &[3], |b| b.phi(DataType::Int64, &[]));
        let next = f.block(3, &[4], |b| b.add(i, one));
        f.block(4, &[2, 5], |b| {
            let cmp = b.compare(ConditionCode::Lt, next, n);
            b.if_imm(cmp);
        });
        let ret = f.block(5, &[EXIT], |b| b.ret(next));
        f.phi_inputs(i, &[(1, zero), (4, next)]);
        (i, next, ret)
    })
}

/// `v = x * x; i = 0; while (i < n) { i = (i + v) + 1 }; return i`
fn invariant_use_loop() -> Result<BuiltGraph<InstId>> {
    GraphBuilder::new().build_with(|f| {
        let x = f.param(0, DataType::Int64);
        let n = f.param(1, DataType::Int64);
        let zero = f.int(0);
        let one = f.int(1);
        let v = f.block(1, &[2], |b| b.mul(x, x));
        let i = f.block(2, &[3, 4], |b| {
            let i = b.phi(DataType::Int64, &[]);
            b.if_cmp(ConditionCode::Lt, i, n);
            i
        });
        let next = f.block(3, &[2], |b| {
            let t = b.add(i, v);
            b.add(t, one)
        });
        f.block(4, &[EXIT], |b| b.ret(i));
        f.phi_inputs(i, &[(1, zero), (3, next)]);
        v
    })
}

#[test]
fn test_constant_branch_removes_dead_arm_and_phi_input() -> Result<()> {
    let mut built = GraphBuilder::new().build_with(|f| {
        let x = f.param(0, DataType::Int64);
        let one = f.int(1);
        f.block(1, &[2, 3], |b| {
            let t = b.literal(true);
            b.if_imm(t);
        });
        f.block(2, &[4], |_| ());
        f.block(3, &[4], |_| ());
        f.block(4, &[EXIT], |b| {
            let phi = b.phi(DataType::Int64, &[(2, x), (3, one)]);
            b.ret(phi);
            (x, phi)
        })
    })?;
    let (x, phi) = built.values;
    let (b1, b2, b3, b4) = (built.block(1), built.block(2), built.block(3), built.block(4));
    let ctx = CompilerContext::default();

    assert!(BranchElimPass::new().run(&mut built.graph, &ctx)?);

    let graph = &mut built.graph;
    assert_eq!(graph.block(b1).succs(), &[b2]);
    assert!(!graph.contains_block(b3));
    assert_eq!(graph.block(b4).preds(), &[b2]);
    assert_eq!(graph.inst(phi).inputs(), &[x]);
    assert!(ctx.events.has(EventKind::BranchEliminated));
    GraphChecker::new(graph).check()?;

    let kept: Vec<_> = graph.blocks().map(|b| graph.block(b).dominator()).collect();
    graph.force_recompute(AnalysisKind::Dominators)?;
    let fresh: Vec<_> = graph.blocks().map(|b| graph.block(b).dominator()).collect();
    assert_eq!(kept, fresh);
    Ok(())
}

#[test]
fn test_side_exit_is_not_single_back_edge_exit_point() -> Result<()> {
    let mut built = GraphBuilder::new().build_with(|f| {
        let n = f.param(0, DataType::Int64);
        let zero = f.int(0);
        let one = f.int(1);
        f.block(1, &[2], |_| ());
        let i = f.block(2, &[5, 3], |b| {
            let i = b.phi(DataType::Int64, &[]);
            b.if_cmp(ConditionCode::Ge, i, n);
            i
        });
        let next = f.block(3, &[2, 4], |b| {
            let next = b.add(i, one);
            b.if_cmp(ConditionCode::Lt, next, n);
            next
        });
        f.block(4, &[EXIT], |b| b.ret(next));
        f.block(5, &[EXIT], |b| b.ret(i));
        f.phi_inputs(i, &[(1, zero), (3, next)]);
    })?;
    let header = built.block(2);
    let graph = &mut built.graph;
    graph.ensure(AnalysisKind::Loops)?;
    let lp = loop_with_header(graph, header);

    assert!(!GraphCloner::new(graph).is_loop_single_back_edge_exit_point(lp));
    Ok(())
}

#[test]
fn test_do_while_is_single_back_edge_exit_point() -> Result<()> {
    let mut built = three_block_do_while()?;
    let header = built.block(2);
    let graph = &mut built.graph;
    graph.ensure(AnalysisKind::Loops)?;
    let lp = loop_with_header(graph, header);

    assert!(GraphCloner::new(graph).is_loop_single_back_edge_exit_point(lp));
    Ok(())
}

#[test]
fn test_inner_loop_exit_disqualifies_outer_loop() -> Result<()> {
    let mut built = GraphBuilder::new().build_with(|f| {
        let n = f.param(0, DataType::Int64);
        let zero = f.int(0);
        let one = f.int(1);
        f.block(1, &[2], |_| ());
        let i = f.block(2, &[3], |b| b.phi(DataType::Int64, &[]));
        let j = f.block(3, &[6, 4], |b| {
            let j = b.phi(DataType::Int64, &[]);
            b.if_cmp(ConditionCode::Ge, j, n);
            j
        });
        let jn = f.block(4, &[3, 5], |b| {
            let jn = b.add(j, one);
            b.if_cmp(ConditionCode::Lt, jn, n);
            jn
        });
        let inext = f.block(5, &[2, 7], |b| {
            let inext = b.add(i, one);
            b.if_cmp(ConditionCode::Lt, inext, n);
            inext
        });
        f.block(6, &[EXIT], |b| b.ret(j));
        f.block(7, &[EXIT], |b| b.ret(i));
        f.phi_inputs(i, &[(1, zero), (5, inext)]);
        f.phi_inputs(j, &[(2, i), (4, jn)]);
    })?;
    let (outer_header, inner_header) = (built.block(2), built.block(3));
    let graph = &mut built.graph;
    graph.ensure(AnalysisKind::Loops)?;
    let outer = loop_with_header(graph, outer_header);
    let inner = loop_with_header(graph, inner_header);
    assert!(graph.is_inside(inner, outer));

    let cloner = GraphCloner::new(graph);
    assert!(!cloner.is_loop_single_back_edge_exit_point(outer));
    assert!(!cloner.is_loop_single_back_edge_exit_point(inner));
    Ok(())
}

#[test]
fn test_value_used_in_loop_is_live_across_whole_loop() -> Result<()> {
    let mut built = invariant_use_loop()?;
    let v = built.values;
    let (header, body) = (built.block(2), built.block(3));
    let graph = &mut built.graph;
    graph.ensure(AnalysisKind::LinearOrder)?;
    let liveness = LivenessAnalyzer::run(graph, &TargetInfo::default())?;

    let (Some(header_range), Some(body_range)) =
        (liveness.block_range(header), liveness.block_range(body))
    else {
        panic!("loop blocks are missing from the linear order");
    };
    let Some(id) = liveness.interval_of(v) else {
        panic!("{v} has no interval");
    };
    let interval = liveness.interval(id);
    let loop_end = header_range.end.max(body_range.end);
    assert!(
        interval
            .ranges()
            .iter()
            .any(|r| r.begin <= header_range.begin && r.end >= loop_end),
        "{interval:?} does not cover the loop [{}, {loop_end})",
        header_range.begin
    );
    assert!(!interval.use_positions().is_empty());
    assert!(interval
        .use_positions()
        .iter()
        .all(|&u| u >= body_range.begin));
    assert_intervals_well_formed(&liveness);
    Ok(())
}

#[test]
fn test_split_and_merge_restore_every_interval() -> Result<()> {
    let mut built = invariant_use_loop()?;
    let graph = &mut built.graph;
    graph.ensure(AnalysisKind::LinearOrder)?;
    let mut liveness = LivenessAnalyzer::run(graph, &TargetInfo::default())?;

    let candidates: Vec<IntervalId> = liveness
        .intervals()
        .filter(|iv| !iv.is_physical() && iv.begin() + 1 < iv.end())
        .map(LifeInterval::id)
        .collect();
    assert!(!candidates.is_empty());

    for id in candidates {
        let original = liveness.interval(id).clone();
        let mid = original.begin() + 1;
        let sibling = liveness.split_at(id, mid);
        assert_eq!(liveness.interval(id).end(), mid);
        assert!(liveness.interval(sibling).begin() >= mid);
        assert_eq!(liveness.sibling_at(sibling, original.begin()), Some(id));

        liveness.merge_sibling(id);
        assert_eq!(liveness.interval(id).ranges(), original.ranges());
        assert_eq!(
            liveness.interval(id).use_positions(),
            original.use_positions()
        );
        assert_eq!(liveness.interval(id).sibling(), None);
    }
    Ok(())
}

#[test]
fn test_clone_loop_adds_second_loop() -> Result<()> {
    let mut built = three_block_do_while()?;
    let (_, next, ret) = built.values;
    let (header, back_edge) = (built.block(2), built.block(4));
    let graph = &mut built.graph;
    graph.ensure(AnalysisKind::Loops)?;
    let lp = loop_with_header(graph, header);
    let members = graph.loop_members(lp);
    let be_slot = graph.block(header).pred_index(back_edge);
    let blocks_before = graph.block_count();

    let map = GraphCloner::new(graph).clone_loop(lp)?;

    assert_eq!(map.block_count(), 3);
    assert_eq!(graph.block_count(), blocks_before + 3);
    let (Some(copy_header), Some(copy_back_edge)) = (map.block(header), map.block(back_edge))
    else {
        panic!("loop blocks were not cloned");
    };
    assert_eq!(graph.inst(ret).input(0), map.resolve(next));
    assert_ne!(map.resolve(next), next);

    for (orig, copy) in map.insts() {
        let (orig_inst, copy_inst) = (graph.inst(orig), graph.inst(copy));
        assert_eq!(orig_inst.opcode(), copy_inst.opcode());
        assert_eq!(orig_inst.inputs().len(), copy_inst.inputs().len());
        let header_phi = copy_inst.is_phi() && copy_inst.block() == Some(copy_header);
        for (k, (&input, &copied)) in orig_inst.inputs().iter().zip(copy_inst.inputs()).enumerate()
        {
            if header_phi && Some(k) != be_slot {
                let Some(be) = be_slot else {
                    panic!("{back_edge} is not a predecessor of {header}");
                };
                assert_eq!(copied, orig_inst.input(be), "entry input of {copy}");
            } else {
                assert_eq!(copied, map.resolve(input), "input {k} of {copy}");
                let inside = graph
                    .inst(input)
                    .block()
                    .is_some_and(|b| members.contains(&b));
                assert_eq!(copied != input, inside, "input {k} of {copy}");
            }
        }
    }
    GraphChecker::new(graph).check()?;

    graph.ensure(AnalysisKind::Loops)?;
    let loops: Vec<&Loop> = graph.loops().filter(|l| !l.is_root()).collect();
    assert_eq!(loops.len(), 2);
    assert!(loops.iter().all(|l| l.back_edges().len() == 1));
    let clone = loop_with_header(graph, copy_header);
    assert_eq!(graph.get_loop(clone).back_edges(), &[copy_back_edge]);
    GraphChecker::new(graph).check()
}
