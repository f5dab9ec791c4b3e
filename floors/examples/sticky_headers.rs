// Example: a sticky section header pushed off by the next one.
use floors::{BlockDescriptor, BlockLayout, BlockType, StickyCoordinator};

fn main() {
    let blocks = vec![
        BlockDescriptor::new("header-a", BlockType::Header).with_sticky(true),
        BlockDescriptor::new("text-a", BlockType::Text),
        BlockDescriptor::new("header-b", BlockType::Header).with_sticky(true),
        BlockDescriptor::new("text-b", BlockType::Text),
    ];
    let mut layout = BlockLayout::new(vec![50, 100, 80, 400], 200);
    let mut sticky = StickyCoordinator::new();

    for offset in [0, 60, 120, 140, 150, 300] {
        layout.scroll_to(offset);
        let change = sticky.update(&layout, &blocks);
        match sticky.pinned() {
            Some(p) => println!(
                "scroll={offset:>3} pinned={} offset={} change={change:?}",
                p.id, p.offset
            ),
            None => println!("scroll={offset:>3} pinned=none change={change:?}"),
        }
    }
}
