//! Integration tests: tags and connectors following strokes (tagline-editor).
//!
//! Drives a `Session` over the in-memory `Canvas` the way a host would:
//! draw on the canvas, then report what happened.

use kurbo::{Affine, Line, Point, Vec2};
use pretty_assertions::assert_eq;
use tagline_core::{
    Color, EngineConfig, EntityId, Geometry, ImageContext, LabelMode, Part, StrokeKey,
    TagBackground, TagShape,
};
use tagline_editor::surface::absolute_center;
use tagline_editor::{BindError, Canvas, Session, SessionError, Surface, TransformKind};

// ─── Helpers ─────────────────────────────────────────────────────────────

fn front() -> ImageContext {
    ImageContext::intern("front")
}

fn session() -> Session<Canvas> {
    Session::new(Canvas::new(), EngineConfig::default(), front()).unwrap()
}

/// Horizontal segment from (0,0) to (100,0), reported as a new stroke.
fn draw(session: &mut Session<Canvas>) -> (EntityId, StrokeKey) {
    let context = session.context();
    let id = session.surface_mut().add_stroke(
        context,
        Geometry::Segment(Line::new((0.0, 0.0), (100.0, 0.0))),
        Affine::IDENTITY,
    );
    let key = session.on_stroke_added(id).unwrap();
    (id, key)
}

fn tag_center(session: &Session<Canvas>, key: StrokeKey) -> Point {
    let tag = session.tag_for(key).expect("no tag bound");
    absolute_center(session.surface(), tag).unwrap()
}

fn connector_line(session: &Session<Canvas>, key: StrokeKey) -> Line {
    let connector = session
        .binder()
        .tag(key)
        .and_then(|t| t.connector)
        .expect("no connector");
    session.surface().connector_line(connector).unwrap()
}

fn near(a: Point, b: Point) -> bool {
    a.distance(b) < 1e-9
}

// ─── Creation ────────────────────────────────────────────────────────────

#[test]
fn new_stroke_gets_label_tag_and_connector() {
    let mut session = session();
    let (_, key) = draw(&mut session);

    assert_eq!(key.label.as_str(), "A1");
    assert_eq!(tag_center(&session, key), Point::new(70.0, -10.0));

    let line = connector_line(&session, key);
    assert_eq!(line.p0, Point::new(70.0, -10.0));
    assert_eq!(line.p1, Point::new(70.0, 0.0));

    let order = session.surface().draw_order(front());
    let connector = session.binder().tag(key).unwrap().connector.unwrap();
    assert_eq!(order[0], connector, "connector must be drawn behind");

    let visual = session
        .surface()
        .tag_visual(session.tag_for(key).unwrap())
        .unwrap();
    assert_eq!(visual.text, "A1");
    assert_eq!(visual.size.width, 32.0);
    assert_eq!(visual.size.height, 28.0);
    assert_eq!(visual.corner_radius, 2.0);
}

#[test]
fn default_offset_is_persisted() {
    let mut session = session();
    let (_, key) = draw(&mut session);
    assert_eq!(
        session.store().get(key).unwrap().tag_offset,
        Some(Vec2::new(20.0, -10.0))
    );
}

#[test]
fn labels_continue_in_sequence() {
    let mut session = session();
    let (_, a1) = draw(&mut session);
    let (_, a2) = draw(&mut session);
    assert_eq!(a1.label.as_str(), "A1");
    assert_eq!(a2.label.as_str(), "A2");

    session.set_label_mode(LabelMode::Letters);
    let (_, a) = draw(&mut session);
    assert_eq!(a.label.as_str(), "A");
}

#[test]
fn predicted_label_is_used_once() {
    let mut session = session();
    session.set_predicted_label(Some("C7".to_string()));
    let (_, first) = draw(&mut session);
    let (_, second) = draw(&mut session);
    assert_eq!(first.label.as_str(), "C7");
    assert_eq!(second.label.as_str(), "C8");
}

#[test]
fn duplicate_create_replaces_tag() {
    let mut session = session();
    let (_, key) = draw(&mut session);
    let first = session.tag_for(key).unwrap();

    let second = session.create_tag(key).unwrap();
    assert_ne!(first, second);
    assert_eq!(session.surface().tags(front()), vec![second]);
    assert_eq!(session.surface().connectors(front()).len(), 1);
    assert_eq!(tag_center(&session, key), Point::new(70.0, -10.0));
}

// ─── Following transforms ────────────────────────────────────────────────

#[test]
fn tag_follows_stroke() {
    let mut session = session();
    let (stroke, key) = draw(&mut session);

    session
        .surface_mut()
        .translate(stroke, Vec2::new(10.0, 30.0))
        .unwrap();
    session.on_transform(stroke, TransformKind::Moving).unwrap();

    assert_eq!(tag_center(&session, key), Point::new(80.0, 20.0));
    let line = connector_line(&session, key);
    assert_eq!(line.p1, Point::new(80.0, 30.0));
}

#[test]
fn dragging_tag_updates_offset_and_connector() {
    let mut session = session();
    let (_, key) = draw(&mut session);
    let tag = session.tag_for(key).unwrap();

    session
        .surface_mut()
        .translate(tag, Vec2::new(100.0, 0.0))
        .unwrap();
    session.on_transform(tag, TransformKind::Moving).unwrap();

    assert_eq!(
        session.store().get(key).unwrap().tag_offset,
        Some(Vec2::new(120.0, -10.0))
    );
    // Past the end of the segment the connector clamps to the endpoint.
    let line = connector_line(&session, key);
    assert_eq!(line.p1, Point::new(100.0, 0.0));
}

#[test]
fn offset_survives_remove_and_recreate() {
    let mut session = session();
    let (stroke, key) = draw(&mut session);
    let tag = session.tag_for(key).unwrap();

    session
        .surface_mut()
        .translate(tag, Vec2::new(15.0, 25.0))
        .unwrap();
    session.on_transform(tag, TransformKind::Modified).unwrap();

    session.set_label_visibility(key, false).unwrap();
    assert_eq!(session.tag_for(key), None);
    assert!(session.surface().tags(front()).is_empty());
    assert!(session.surface().connectors(front()).is_empty());

    session
        .surface_mut()
        .translate(stroke, Vec2::new(0.0, 40.0))
        .unwrap();
    session.on_stroke_modified(stroke).unwrap();

    session.set_label_visibility(key, true).unwrap();
    // Stroke center (50, 40) + offset (35, 15).
    assert_eq!(tag_center(&session, key), Point::new(85.0, 55.0));
}

#[test]
fn grouped_tag_is_not_repositioned() {
    let mut session = session();
    let (stroke, key) = draw(&mut session);
    let tag = session.tag_for(key).unwrap();
    let old_connector = session.binder().tag(key).unwrap().connector;

    session.surface_mut().select(&[stroke, tag]).unwrap();
    session
        .surface_mut()
        .transform_selection(Affine::rotate_about(
            std::f64::consts::FRAC_PI_2,
            Point::new(50.0, -10.0),
        ));
    let before = tag_center(&session, key);

    session.on_transform(stroke, TransformKind::Rotating).unwrap();

    assert!(near(tag_center(&session, key), before));
    assert_ne!(session.binder().tag(key).unwrap().connector, old_connector);
    assert_eq!(session.surface().connectors(front()).len(), 1);
}

#[test]
fn compound_stroke_anchor_uses_group_frame() {
    let mut session = session();
    let context = session.context();
    let arrow = Geometry::Compound(vec![
        Part::new(Geometry::Segment(Line::new((0.0, 0.0), (40.0, 0.0)))),
        Part {
            transform: Affine::translate(Vec2::new(40.0, 0.0)),
            geometry: Geometry::Segment(Line::new((-5.0, -5.0), (0.0, 0.0))),
        },
    ]);
    let id = session.surface_mut().add_stroke(
        context,
        arrow,
        Affine::translate(Vec2::new(0.0, 100.0)) * Affine::rotate(std::f64::consts::FRAC_PI_2),
    );
    let key = session.on_stroke_added(id).unwrap();

    let tag = session.tag_for(key).unwrap();
    session
        .surface_mut()
        .set_center(tag, Point::new(30.0, 120.0))
        .unwrap();
    session.on_transform(tag, TransformKind::Moving).unwrap();

    // Shaft runs from (0, 100) to (0, 140) after the stroke transform.
    let line = connector_line(&session, key);
    assert!(near(line.p1, Point::new(0.0, 120.0)), "got {:?}", line.p1);
}

#[test]
fn deferred_updates_coalesce() {
    let mut session = session();
    let (stroke, key) = draw(&mut session);

    for _ in 0..5 {
        session
            .surface_mut()
            .translate(stroke, Vec2::new(2.0, 0.0))
            .unwrap();
        session.defer_transform(stroke);
    }
    assert_eq!(session.end_frame(), 1);
    assert_eq!(session.end_frame(), 0);
    assert_eq!(tag_center(&session, key), Point::new(80.0, -10.0));
    assert_eq!(session.surface().connectors(front()).len(), 1);
}

// ─── Text & appearance ───────────────────────────────────────────────────

#[test]
fn measurement_text_keeps_tag_center() {
    let mut session = session();
    let (_, key) = draw(&mut session);
    session.set_show_measurements(true);

    session.enter_measurement(key, "5 1/2\"").unwrap();
    let tag = session.tag_for(key).unwrap();
    let visual = session.surface().tag_visual(tag).unwrap();
    assert_eq!(visual.text, "A1 = 5 1/2\"");
    assert_eq!(visual.center, Point::new(70.0, -10.0));
    assert_eq!(visual.size.width, 11.0 * 12.0 + 8.0);

    let err = session.enter_measurement(key, "abc");
    assert!(matches!(err, Err(SessionError::Store(_))));
    let visual = session.surface().tag_visual(tag).unwrap();
    assert_eq!(visual.text, "A1 = 5 1/2\"");

    session.set_display_unit(tagline_core::DisplayUnit::Centimeter);
    let visual = session.surface().tag_visual(tag).unwrap();
    assert_eq!(visual.text, "A1 = 14.0 cm");
    assert_eq!(visual.center, Point::new(70.0, -10.0));

    session.set_show_measurements(false);
    let visual = session.surface().tag_visual(tag).unwrap();
    assert_eq!(visual.text, "A1");
}

#[test]
fn tag_size_and_shape() {
    let mut session = session();
    let (_, key) = draw(&mut session);
    let tag = session.tag_for(key).unwrap();

    session.step_tag_size(20);
    let visual = session.surface().tag_visual(tag).unwrap();
    assert_eq!(visual.font_size, 40.0);

    session.step_tag_size(-1);
    assert_eq!(session.config().tag_font_size, 38.0);

    session.set_tag_shape(TagShape::Circle);
    let visual = session.surface().tag_visual(tag).unwrap();
    assert_eq!(visual.corner_radius, visual.size.height / 2.0);
}

#[test]
fn default_background_is_solid() {
    let mut session = session();
    let (_, key) = draw(&mut session);
    let colors = session
        .surface()
        .tag_visual(session.tag_for(key).unwrap())
        .unwrap()
        .colors;
    assert_eq!(colors.fill, Color::WHITE);
    assert_eq!(colors.border, Color::BLACK);
    assert_eq!(colors.border_width, 1.0);
    assert_eq!(colors.text, Color::BLACK);
}

#[test]
fn clear_color_background_follows_stroke_color() {
    let mut session = session();
    let (_, key) = draw(&mut session);
    let tag = session.tag_for(key).unwrap();
    let red = Color::rgb(255, 0, 0);

    session.set_tag_background(TagBackground::ClearColor);
    let visual = session.surface().tag_visual(tag).unwrap();
    assert!(visual.colors.fill.is_transparent());
    assert_eq!(visual.colors.text, Color::DEFAULT_STROKE);

    session.set_stroke_color(red);
    let visual = session.surface().tag_visual(tag).unwrap();
    assert_eq!(visual.colors.border, red);
    assert_eq!(visual.colors.text, red);
    assert_eq!(visual.text, "A1");
    assert_eq!(tag_center(&session, key), Point::new(70.0, -10.0));
    assert_eq!(session.config().stroke_color, red);
}

#[test]
fn solid_background_ignores_stroke_color() {
    let mut session = session();
    let (_, key) = draw(&mut session);
    let tag = session.tag_for(key).unwrap();
    let before = session.surface().tag_visual(tag).unwrap();

    session.set_stroke_color(Color::rgb(0, 128, 0));
    assert_eq!(session.surface().tag_visual(tag).unwrap(), before);
}

#[test]
fn no_fill_background_shows_only_text() {
    let mut session = session();
    let (_, key) = draw(&mut session);
    session.set_stroke_color(Color::rgb(0, 128, 0));
    session.set_tag_background(TagBackground::NoFill);

    let colors = session
        .surface()
        .tag_visual(session.tag_for(key).unwrap())
        .unwrap()
        .colors;
    assert!(colors.fill.is_transparent());
    assert!(colors.border.is_transparent());
    assert_eq!(colors.border_width, 0.0);
    assert_eq!(colors.text, Color::rgb(0, 128, 0));
    assert_eq!(session.config().tag_background, TagBackground::NoFill);
}

#[test]
fn new_tags_use_current_background() {
    let mut session = session();
    session.set_tag_background(TagBackground::ClearWhite);
    let (_, key) = draw(&mut session);
    let colors = session
        .surface()
        .tag_visual(session.tag_for(key).unwrap())
        .unwrap()
        .colors;
    assert_eq!(colors.border, Color::WHITE);
    assert_eq!(colors.text, Color::WHITE);
}

// ─── Visibility & removal ────────────────────────────────────────────────

#[test]
fn hiding_stroke_hides_tag_and_connector() {
    let mut session = session();
    let (stroke, key) = draw(&mut session);
    session.set_visibility(key, false).unwrap();

    let tag = session.tag_for(key).unwrap();
    let canvas = session.surface();
    assert_eq!(canvas.is_visible(stroke), Some(false));
    assert_eq!(canvas.is_visible(tag), Some(false));
    let connector = session.binder().tag(key).unwrap().connector.unwrap();
    assert_eq!(canvas.is_visible(connector), Some(false));

    session.on_transform(stroke, TransformKind::Moving).unwrap();
    let connector = session.binder().tag(key).unwrap().connector.unwrap();
    assert_eq!(session.surface().is_visible(connector), Some(false));
}

#[test]
fn hidden_label_refuses_tag() {
    let mut session = session();
    let (_, key) = draw(&mut session);
    session.set_label_visibility(key, false).unwrap();
    assert!(matches!(
        session.create_tag(key),
        Err(SessionError::Bind(BindError::LabelHidden(_)))
    ));
}

#[test]
fn removed_stroke_detaches_tag() {
    let mut session = session();
    let (stroke, key) = draw(&mut session);

    session.surface_mut().remove(stroke).unwrap();
    assert_eq!(session.on_stroke_removed(stroke), Some(key));

    assert!(session.store().get(key).is_none());
    assert_eq!(session.binder().tag_count(), 0);
    assert!(session.surface().draw_order(front()).is_empty());
    assert_eq!(session.on_stroke_removed(stroke), None);
}

// ─── Contexts ────────────────────────────────────────────────────────────

#[test]
fn switching_context_swaps_tags() {
    let mut session = session();
    draw(&mut session);
    let side = ImageContext::intern("side");

    session.switch_context(side).unwrap();
    assert!(session.surface().tags(front()).is_empty());
    let (_, side_key) = draw(&mut session);
    assert_eq!(side_key.label.as_str(), "A1");
    assert_eq!(session.surface().tags(side).len(), 1);

    session.switch_context(front()).unwrap();
    assert_eq!(session.surface().tags(front()).len(), 1);
    assert!(session.surface().tags(side).is_empty());
}

#[test]
fn clearing_context_drops_tags() {
    let mut session = session();
    draw(&mut session);
    draw(&mut session);
    session.clear_context(front());

    assert!(session.store().is_empty(front()));
    assert!(session.surface().tags(front()).is_empty());
    assert!(session.surface().connectors(front()).is_empty());
    assert_eq!(session.surface().strokes(front()).len(), 2);
}

#[test]
fn store_listeners_see_session_changes() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let mut session = session();
    let seen = Rc::new(RefCell::new(0usize));
    let counter = Rc::clone(&seen);
    session.subscribe(move |_| *counter.borrow_mut() += 1);

    let (_, key) = draw(&mut session);
    session.enter_measurement(key, "3\"").unwrap();
    // attach, default offset, measurement
    assert_eq!(*seen.borrow(), 3);
}
