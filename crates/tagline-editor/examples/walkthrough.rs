//! Scripted annotation session on the in-memory canvas.
//!
//! Run with `RUST_LOG=debug cargo run -p tagline-editor --example walkthrough`.

use kurbo::{Affine, Line, Vec2};
use tagline_core::{DisplayUnit, EngineConfig, Geometry, ImageContext};
use tagline_editor::{Canvas, RestoreOutcome, Session, SessionError, TransformKind};

fn main() -> Result<(), SessionError> {
    env_logger::init();

    let front = ImageContext::intern("front");
    let mut session = Session::new(Canvas::new(), EngineConfig::default(), front)?;

    let sleeve = session.surface_mut().add_stroke(
        front,
        Geometry::Segment(Line::new((0.0, 0.0), (120.0, 0.0))),
        Affine::IDENTITY,
    );
    let key = session.on_stroke_added(sleeve)?;
    session.set_show_measurements(true);
    session.enter_measurement(key, "24 3/4\"")?;
    print_tags(&session, "after measuring");

    session
        .surface_mut()
        .translate(sleeve, Vec2::new(0.0, 40.0))?;
    session.on_transform(sleeve, TransformKind::Modified)?;
    print_tags(&session, "after moving the stroke");

    session.set_display_unit(DisplayUnit::Centimeter);
    print_tags(&session, "in centimeters");

    if let RestoreOutcome::Started(ticket) = session.undo() {
        println!("undo started ({ticket:?})");
        for status in session.settle() {
            println!("load finished: {status:?}");
        }
    }
    print_tags(&session, "after undo");

    Ok(())
}

fn print_tags(session: &Session<Canvas>, heading: &str) {
    println!("-- {heading}");
    for record in session.store().records(session.context()) {
        let key = session.key(record.label.as_str());
        let Some(visual) = session
            .tag_for(key)
            .and_then(|tag| session.surface().tag_visual(tag))
        else {
            continue;
        };
        println!(
            "{:>4}  text={:<16} center=({:.1}, {:.1})",
            record.label.as_str(),
            visual.text,
            visual.center.x,
            visual.center.y
        );
    }
}
