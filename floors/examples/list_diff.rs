// Example: reconcile two block lists and replay the ops on a headless layout.
use floors::{BlockDescriptor, BlockLayout, BlockType, ListViewport, apply, dispatch, reconcile};

fn text(id: &str, title: &str) -> BlockDescriptor {
    BlockDescriptor::new(id, BlockType::Text).with_field("title", title)
}

fn main() {
    let old = vec![text("a", "A"), text("b", "B"), text("c", "C"), text("d", "D")];
    let new = vec![text("c", "C"), text("a", "A2"), text("e", "E"), text("b", "B")];

    let ops = reconcile(&old, &new);
    for op in &ops {
        println!("{op:?}");
    }

    // Moves carry measured heights along with the block.
    let mut layout = BlockLayout::new(vec![10, 20, 30, 40], 50);
    dispatch(&ops, &mut layout);
    let heights: Vec<_> = (0..layout.item_count())
        .map(|i| layout.item_height(i))
        .collect();
    println!("heights after dispatch: {heights:?}");

    // Per-row state follows the same ops: here, just the id and a render count.
    let mut rows: Vec<(String, u32)> = old.iter().map(|d| (d.id.clone(), 1)).collect();
    apply(
        &ops,
        &mut rows,
        |_, id| (id.to_owned(), 1),
        |(id, _)| println!("disposed {id}"),
        |(_, renders), _| *renders += 1,
    );
    println!("rows after apply: {rows:?}");
}
