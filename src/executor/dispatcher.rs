// Maps a ComputerAction onto control-surface calls.
use std::time::Duration;

use crate::agent_engine::state::ComputerAction;
use crate::desktop::{MouseButton, Point, RemoteDesktop};
use crate::errors::DeskPilotResult;
use crate::executor::coordinator::ResolutionScaler;

/// Executes `action` against `desktop`. Every coordinate goes through
/// `scaler` first. Unknown and no-op actions succeed without touching the
/// desktop; control-surface failures propagate.
pub async fn dispatch(
    desktop: &dyn RemoteDesktop,
    scaler: &ResolutionScaler,
    action: &ComputerAction,
) -> DeskPilotResult<()> {
    let to_device = |x: i32, y: i32| scaler.to_device_space(Point::new(x, y));

    match action {
        ComputerAction::Click {
            x,
            y,
            button,
            modifier,
        } => {
            let at = to_device(*x, *y);
            press_modifier(desktop, at, modifier.as_deref()).await?;
            match button {
                MouseButton::Left => desktop.left_click(Some(at)).await,
                MouseButton::Right => desktop.right_click(at).await,
                MouseButton::Middle => desktop.middle_click(at).await,
            }
        }

        ComputerAction::DoubleClick { x, y, modifier } => {
            let at = to_device(*x, *y);
            press_modifier(desktop, at, modifier.as_deref()).await?;
            desktop.double_click(at).await
        }

        ComputerAction::TripleClick { x, y, modifier } => {
            let at = to_device(*x, *y);
            desktop.move_mouse(at).await?;
            if let Some(keys) = modifier.as_deref().map(split_keys) {
                desktop.press(&keys).await?;
            }
            for _ in 0..3 {
                desktop.left_click(None).await?;
            }
            Ok(())
        }

        ComputerAction::Type { text } => desktop.write(text).await,

        ComputerAction::Keypress { keys } => desktop.press(keys).await,

        ComputerAction::MouseMove { x, y } => desktop.move_mouse(to_device(*x, *y)).await,

        ComputerAction::Scroll {
            x,
            y,
            direction,
            amount,
            modifier,
        } => {
            let at = to_device(*x, *y);
            desktop.move_mouse(at).await?;
            if let Some(keys) = modifier.as_deref().map(split_keys) {
                desktop.press(&keys).await?;
            }
            if *amount > 0 {
                desktop.scroll(*direction, *amount).await?;
            }
            Ok(())
        }

        ComputerAction::Drag { start, end } => {
            desktop
                .drag(scaler.to_device_space(*start), scaler.to_device_space(*end))
                .await
        }

        ComputerAction::Wait { duration_ms } => {
            tracing::debug!(ms = duration_ms, "waiting");
            tokio::time::sleep(Duration::from_millis(*duration_ms)).await;
            Ok(())
        }

        // A screenshot is taken after every action anyway.
        ComputerAction::Screenshot | ComputerAction::CursorPosition => Ok(()),

        ComputerAction::Unknown { name } => {
            tracing::warn!(action = %name, "unknown action type, skipping");
            Ok(())
        }
    }
}

/// Move to `at` and hold the modifier chord before a click.
async fn press_modifier(
    desktop: &dyn RemoteDesktop,
    at: Point,
    modifier: Option<&str>,
) -> DeskPilotResult<()> {
    if let Some(modifier) = modifier {
        desktop.move_mouse(at).await?;
        desktop.press(&split_keys(modifier)).await?;
    }
    Ok(())
}

/// "ctrl+shift" → ["ctrl", "shift"]
pub fn split_keys(chord: &str) -> Vec<String> {
    chord
        .split('+')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::desktop::mock::MockDesktop;
    use crate::desktop::{Resolution, ScrollDirection};

    /// Model space 1024x576 mapped onto a 2048x1152 screen: factor 2.
    fn setup() -> (Arc<MockDesktop>, ResolutionScaler) {
        let desktop = MockDesktop::new("sbx", Resolution::new(2048, 1152));
        let scaler = ResolutionScaler::from_parts(
            desktop.clone(),
            Resolution::new(2048, 1152),
            Resolution::new(2048, 1152),
            Resolution::new(1024, 768),
        )
        .unwrap();
        (desktop, scaler)
    }

    async fn run(action: ComputerAction) -> Vec<String> {
        let (desktop, scaler) = setup();
        dispatch(desktop.as_ref(), &scaler, &action).await.unwrap();
        desktop.calls()
    }

    #[tokio::test]
    async fn clicks_are_scaled() {
        let calls = run(ComputerAction::Click {
            x: 10,
            y: 20,
            button: MouseButton::Left,
            modifier: None,
        })
        .await;
        assert_eq!(calls, vec!["left_click 20,40"]);

        let calls = run(ComputerAction::Click {
            x: 1,
            y: 2,
            button: MouseButton::Middle,
            modifier: None,
        })
        .await;
        assert_eq!(calls, vec!["middle_click 2,4"]);
    }

    #[tokio::test]
    async fn modifier_pressed_before_click() {
        let calls = run(ComputerAction::Click {
            x: 5,
            y: 5,
            button: MouseButton::Right,
            modifier: Some("ctrl+shift".into()),
        })
        .await;
        assert_eq!(calls, vec!["move 10,10", "press ctrl+shift", "right_click 10,10"]);
    }

    #[tokio::test]
    async fn triple_click_moves_then_clicks_three_times() {
        let calls = run(ComputerAction::TripleClick {
            x: 50,
            y: 60,
            modifier: None,
        })
        .await;
        assert_eq!(calls, vec!["move 100,120", "left_click", "left_click", "left_click"]);
    }

    #[tokio::test]
    async fn scroll_moves_first() {
        let calls = run(ComputerAction::Scroll {
            x: 100,
            y: 100,
            direction: ScrollDirection::Down,
            amount: 3,
            modifier: None,
        })
        .await;
        assert_eq!(calls, vec!["move 200,200", "scroll Down 3"]);
    }

    #[tokio::test]
    async fn drag_scales_both_ends() {
        let calls = run(ComputerAction::Drag {
            start: Point::new(1, 1),
            end: Point::new(100, 50),
        })
        .await;
        assert_eq!(calls, vec!["drag 2,2 -> 200,100"]);
    }

    #[tokio::test]
    async fn text_and_keys_pass_through() {
        assert_eq!(run(ComputerAction::Type { text: "ls".into() }).await, vec!["write ls"]);
        assert_eq!(
            run(ComputerAction::Keypress {
                keys: vec!["Return".into()]
            })
            .await,
            vec!["press Return"]
        );
    }

    #[tokio::test]
    async fn no_ops_touch_nothing() {
        assert!(run(ComputerAction::Screenshot).await.is_empty());
        assert!(run(ComputerAction::CursorPosition).await.is_empty());
        assert!(run(ComputerAction::Unknown {
            name: "left_mouse_down".into()
        })
        .await
        .is_empty());
        assert!(run(ComputerAction::Wait { duration_ms: 1 }).await.is_empty());
    }

    #[test]
    fn split_keys_trims() {
        assert_eq!(split_keys(" ctrl + c "), vec!["ctrl", "c"]);
        assert!(split_keys("").is_empty());
    }
}
