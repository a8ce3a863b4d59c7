//! Integration tests: labelling, measuring and snapshotting strokes through
//! the store, the way a drawing session drives it.

use pretty_assertions::assert_eq;
use tagline_core::kurbo::{Affine, Line, Point, Rect, Vec2};
use tagline_core::*;

// ─── Helpers ─────────────────────────────────────────────────────────────

fn draw(store: &mut StrokeStore, context: ImageContext, mode: LabelMode) -> StrokeKey {
    let labels: Vec<String> = store
        .labels(context)
        .map(|l| l.as_str().to_string())
        .collect();
    let label = next_label(labels.iter().map(String::as_str), mode, None).unwrap();
    store.attach(context, label, EntityId::fresh(), StrokeKind::Segment)
}

// ─── Labels ──────────────────────────────────────────────────────────────

#[test]
fn labels_follow_store_contents() {
    let mut store = StrokeStore::new();
    let ctx = ImageContext::intern("flow-labels");

    let a1 = draw(&mut store, ctx, LabelMode::LettersAndNumbers);
    let a2 = draw(&mut store, ctx, LabelMode::LettersAndNumbers);
    assert_eq!(a1.label.as_str(), "A1");
    assert_eq!(a2.label.as_str(), "A2");

    store.detach(a1);
    let next = draw(&mut store, ctx, LabelMode::LettersAndNumbers);
    assert_eq!(next.label.as_str(), "A3");
}

#[test]
fn letters_mode_reuses_freed_letter() {
    let mut store = StrokeStore::new();
    let ctx = ImageContext::intern("flow-letters");

    let a = draw(&mut store, ctx, LabelMode::Letters);
    draw(&mut store, ctx, LabelMode::Letters);
    draw(&mut store, ctx, LabelMode::Letters);
    store.detach(a);

    let again = draw(&mut store, ctx, LabelMode::Letters);
    assert_eq!(again.label.as_str(), "A");
}

#[test]
fn labels_are_scoped_per_context() {
    let mut store = StrokeStore::new();
    let front = ImageContext::intern("flow-front");
    let side = ImageContext::intern("flow-side");

    draw(&mut store, front, LabelMode::LettersAndNumbers);
    draw(&mut store, front, LabelMode::LettersAndNumbers);
    let first_side = draw(&mut store, side, LabelMode::LettersAndNumbers);
    assert_eq!(first_side.label.as_str(), "A1");
}

// ─── Measurements ────────────────────────────────────────────────────────

#[test]
fn measurement_text_round_trip_through_store() {
    let mut store = StrokeStore::new();
    let ctx = ImageContext::intern("flow-measure");
    let key = draw(&mut store, ctx, LabelMode::LettersAndNumbers);

    store
        .apply_measurement_text(key, "14 cm", DisplayUnit::Centimeter)
        .unwrap();
    let m = store.get(key).unwrap().measurement.unwrap();
    assert_eq!(
        format_measurement(&m, DisplayUnit::Centimeter).as_deref(),
        Some("14.0 cm")
    );
    assert_eq!(
        format_measurement(&m, DisplayUnit::Inch).as_deref(),
        Some("5 1/2\"")
    );

    assert!(
        store
            .apply_measurement_text(key, "two feet", DisplayUnit::Inch)
            .is_err()
    );
    assert_eq!(store.get(key).unwrap().measurement, Some(m));

    store.apply_measurement_text(key, "0", DisplayUnit::Inch).unwrap();
    assert_eq!(store.get(key).unwrap().measurement, None);
}

// ─── Snapshots ───────────────────────────────────────────────────────────

#[test]
fn snapshot_survives_json() {
    let mut store = StrokeStore::new();
    let ctx = ImageContext::intern("flow-json");
    let key = draw(&mut store, ctx, LabelMode::LettersAndNumbers);
    store.set_measurement(key, Measurement::from_inches(7.25)).unwrap();
    store.set_tag_offset(key, Vec2::new(12.0, -3.0)).unwrap();

    let snapshot = store.snapshot_context(ctx);
    let json = serde_json::to_string(&snapshot).unwrap();
    let decoded: ContextSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, snapshot);
}

// ─── Geometry ────────────────────────────────────────────────────────────

#[test]
fn closest_point_on_plain_segment() {
    let geometry = Geometry::Segment(Line::new((0.0, 0.0), (10.0, 0.0)));
    let shape = StrokeShape {
        geometry: Some(&geometry),
        to_world: Affine::IDENTITY,
        bounds: Rect::new(0.0, 0.0, 10.0, 0.0),
    };
    let density = EngineConfig::default().density();

    assert_eq!(
        closest_point(&shape, Point::new(5.0, 5.0), density),
        Point::new(5.0, 0.0)
    );
    assert_eq!(
        closest_point(&shape, Point::new(-3.0, 1.0), density),
        Point::new(0.0, 0.0)
    );
}
