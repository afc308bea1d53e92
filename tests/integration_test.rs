//! 使用脚本化的假浏览器驱动完整的重试编排流程
//!
//! 所有测试都运行在暂停的 tokio 时钟上，退避与冷却不会真的等待

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chat_image_batch::browser::{BoundingBox, Key, Point, Viewport};
use chat_image_batch::config::Selectors;
use chat_image_batch::error::LaunchError;
use chat_image_batch::models::diagnosis::POLICY_REMEDIATION_PHRASE;
use chat_image_batch::models::parse_requests;
use chat_image_batch::services::{Humanizer, SessionManager, SessionSettings, TypingSpeed};
use chat_image_batch::{
    App, AppError, AppResult, BatchJob, BrowserLauncher, BrowserPage, Config, ContentType,
    Diagnosis,
};
use tempfile::TempDir;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 按下回车后页面的反应
#[derive(Debug, Clone)]
enum Reply {
    /// 生成图片：出现新的下载按钮
    Image,
    /// 只回复文字，没有图片
    Text(&'static str),
    /// 回车时页面报错
    Broken,
    /// 生成图片，点击下载后页面崩溃（文件已落盘）
    ImageThenCrash,
    /// 一次点击下载了两个文件
    DoubleImage,
}

#[derive(Default)]
struct World {
    launches: usize,
    closes: usize,
    download_dir: Option<PathBuf>,
    /// 当前会话中的下载按钮数量
    buttons: usize,
    /// 点击下载按钮时是否会产生文件
    armed: bool,
    /// 点击下载按钮时多写一个文件
    extra_file: bool,
    /// 点击下载按钮后页面崩溃
    crash_on_click: bool,
    /// 页面已崩溃，无法读取回复
    crashed: bool,
    reply_text: Option<String>,
    script: VecDeque<Reply>,
    prompts: Vec<String>,
    screenshots: Vec<PathBuf>,
    /// 接下来若干次设置暂存目录时失败
    fail_staging: usize,
    files_written: usize,
    /// 逐字输入的内容
    typed: String,
}

type SharedWorld = Arc<Mutex<World>>;

struct FakePage {
    world: SharedWorld,
    download_selector: String,
    viewport: Mutex<Viewport>,
}

impl FakePage {
    fn world(&self) -> std::sync::MutexGuard<'_, World> {
        self.world.lock().unwrap()
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn navigate(&self, _url: &str) -> AppResult<()> {
        Ok(())
    }

    async fn wait_for(&self, _selector: &str, _timeout: Duration) -> AppResult<()> {
        Ok(())
    }

    async fn count(&self, selector: &str) -> AppResult<usize> {
        if selector == self.download_selector {
            Ok(self.world().buttons)
        } else {
            Ok(1)
        }
    }

    async fn bounding_box(&self, _selector: &str, _index: usize) -> AppResult<Option<BoundingBox>> {
        Ok(Some(BoundingBox {
            x: 300.0,
            y: 500.0,
            width: 200.0,
            height: 40.0,
        }))
    }

    async fn click_element(&self, _selector: &str, _index: usize) -> AppResult<()> {
        Ok(())
    }

    async fn scroll_into_view(&self, _selector: &str, _index: usize) -> AppResult<()> {
        Ok(())
    }

    async fn mouse_move(&self, _to: Point) -> AppResult<()> {
        Ok(())
    }

    async fn mouse_click(&self, _at: Point, _hold: Duration) -> AppResult<()> {
        let mut world = self.world();
        if !world.armed {
            return Ok(());
        }
        world.armed = false;
        let dir = world.download_dir.clone().expect("download dir not set");
        let count = if world.extra_file { 2 } else { 1 };
        world.extra_file = false;
        for _ in 0..count {
            world.files_written += 1;
            std::fs::write(
                dir.join(format!("generated-{}.png", world.files_written)),
                b"png",
            )
            .unwrap();
        }
        if world.crash_on_click {
            world.crash_on_click = false;
            world.crashed = true;
            return Err(AppError::browser("页面已崩溃"));
        }
        Ok(())
    }

    async fn mouse_wheel(&self, _at: Point, _delta_y: f64) -> AppResult<()> {
        Ok(())
    }

    async fn key_down(&self, key: Key) -> AppResult<()> {
        if key != Key::Enter {
            return Ok(());
        }
        let mut world = self.world();
        match world.script.pop_front().unwrap_or(Reply::Image) {
            Reply::Image => {
                world.buttons += 1;
                world.armed = true;
                world.reply_text = None;
            }
            Reply::Text(text) => world.reply_text = Some(text.to_string()),
            Reply::Broken => return Err(AppError::browser("输入框已失效")),
            Reply::ImageThenCrash => {
                world.buttons += 1;
                world.armed = true;
                world.crash_on_click = true;
            }
            Reply::DoubleImage => {
                world.buttons += 1;
                world.armed = true;
                world.extra_file = true;
            }
        }
        Ok(())
    }

    async fn key_up(&self, _key: Key) -> AppResult<()> {
        Ok(())
    }

    async fn type_char(&self, ch: char) -> AppResult<()> {
        self.world().typed.push(ch);
        Ok(())
    }

    async fn insert_text(&self, text: &str) -> AppResult<()> {
        self.world().prompts.push(text.to_string());
        Ok(())
    }

    async fn set_download_dir(&self, dir: &Path) -> AppResult<()> {
        let mut world = self.world();
        let staging = dir
            .file_name()
            .map(|name| name.to_string_lossy().starts_with("request-"))
            .unwrap_or(false);
        if staging && world.fail_staging > 0 {
            world.fail_staging -= 1;
            return Err(AppError::browser("下载设置被拒绝"));
        }
        world.download_dir = Some(dir.to_path_buf());
        Ok(())
    }

    async fn set_viewport(&self, viewport: Viewport) -> AppResult<()> {
        *self.viewport.lock().unwrap() = viewport;
        Ok(())
    }

    async fn viewport(&self) -> AppResult<Viewport> {
        Ok(*self.viewport.lock().unwrap())
    }

    async fn last_response_text(&self, _block: &str, _paragraph: &str) -> AppResult<Option<String>> {
        let world = self.world();
        if world.crashed {
            return Err(AppError::browser("页面无响应"));
        }
        Ok(world.reply_text.clone())
    }

    async fn screenshot(&self, path: &Path) -> AppResult<()> {
        self.world().screenshots.push(path.to_path_buf());
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        self.world().closes += 1;
        Ok(())
    }
}

struct FakeLauncher {
    world: SharedWorld,
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> AppResult<Box<dyn BrowserPage>> {
        {
            let mut world = self.world.lock().unwrap();
            world.launches += 1;
            world.buttons = 0;
            world.armed = false;
            world.extra_file = false;
            world.crash_on_click = false;
            world.crashed = false;
            world.reply_text = None;
        }
        Ok(Box::new(FakePage {
            world: self.world.clone(),
            download_selector: Selectors::default().download_button,
            viewport: Mutex::new(Viewport {
                width: 800,
                height: 600,
            }),
        }))
    }
}

struct Harness {
    _dir: TempDir,
    config: Config,
    world: SharedWorld,
}

impl Harness {
    fn new(script: Vec<Reply>) -> Self {
        Self::with_config(script, |_| {})
    }

    fn with_config(script: Vec<Reply>, adjust: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config {
            downloads_dir: dir.path().join("downloads"),
            outputs_dir: dir.path().join("outputs"),
            screenshot_path: dir.path().join("error-screenshot.png"),
            ..Config::default()
        };
        adjust(&mut config);
        let world = Arc::new(Mutex::new(World {
            script: script.into(),
            ..World::default()
        }));
        Self {
            _dir: dir,
            config,
            world,
        }
    }

    fn app(&self, cancel: CancellationToken) -> App<FakeLauncher> {
        let launcher = FakeLauncher {
            world: self.world.clone(),
        };
        let humanizer = Arc::new(Humanizer::seeded(42, cancel));
        App::with_launcher(self.config.clone(), launcher, humanizer).unwrap()
    }

    fn world(&self) -> std::sync::MutexGuard<'_, World> {
        self.world.lock().unwrap()
    }

    fn output(&self, index: usize) -> PathBuf {
        self.config.outputs_dir.join(format!("{}_image.png", index))
    }

    /// 下载目录中残留的暂存目录
    fn staging_dirs(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.config.downloads_dir) else {
            return Vec::new();
        };
        entries
            .map(|entry| entry.unwrap().path())
            .filter(|path| {
                path.is_dir()
                    && path
                        .file_name()
                        .map(|name| name.to_string_lossy().starts_with("request-"))
                        .unwrap_or(false)
            })
            .collect()
    }
}

fn requests(count: usize) -> Vec<chat_image_batch::GenerationRequest> {
    let records: Vec<String> = (1..=count)
        .map(|i| {
            format!(
                r#"{{"positivePrompt": "a lighthouse at dusk, scene {}", "negativePrompt": "text"}}"#,
                i
            )
        })
        .collect();
    parse_requests(&format!("[{}]", records.join(","))).unwrap()
}

fn job() -> BatchJob {
    BatchJob {
        content_type: ContentType::Video,
        style: "Neutral style".to_string(),
    }
}

const POLICY_TEXT: &str = "I can't create that image because it violates our content policies.";
const RATE_LIMIT_TEXT: &str =
    "You've hit the image generation rate limit. Please try again in 5 minutes.";
const UNRELATED_TEXT: &str = "Something went wrong while generating the response.";

#[tokio::test(start_paused = true)]
async fn test_two_images_on_first_try() {
    let harness = Harness::new(vec![Reply::Image, Reply::Image]);
    let mut app = harness.app(CancellationToken::new());

    let report = app.run(&requests(2), &job()).await.unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.session_resets, 0);
    assert!(report.outcomes.iter().all(|o| o.attempt_count() == 1));
    assert!(harness.output(1).exists());
    assert!(harness.output(2).exists());

    let world = harness.world();
    assert_eq!(world.launches, 1);
    assert_eq!(world.closes, 1);
    assert!(world.prompts[0].contains("16:9"));
}

#[tokio::test(start_paused = true)]
async fn test_policy_violation_retries_in_session_then_resets() {
    let harness = Harness::new(vec![
        Reply::Image,
        Reply::Text(POLICY_TEXT),
        Reply::Text(POLICY_TEXT),
        Reply::Text(POLICY_TEXT),
        Reply::Image,
    ]);
    let mut app = harness.app(CancellationToken::new());

    let report = app.run(&requests(2), &job()).await.unwrap();

    let attempts: Vec<usize> = report.outcomes.iter().map(|o| o.attempt_count()).collect();
    assert_eq!(attempts, vec![1, 4]);
    assert_eq!(report.session_resets, 1);
    assert!(harness.output(2).exists());

    let second = &report.outcomes[1];
    assert!(matches!(
        second.attempts[2].diagnosis,
        Diagnosis::PolicyViolation { ref remediation } if remediation.requires_reset
    ));
    assert!(matches!(
        second.attempts[0].diagnosis,
        Diagnosis::PolicyViolation { ref remediation } if !remediation.requires_reset
    ));

    let world = harness.world();
    assert_eq!(world.launches, 2);
    assert_eq!(world.prompts.len(), 5);
    assert!(!world.prompts[1].contains(POLICY_REMEDIATION_PHRASE));
    // 修正语只追加一次
    for prompt in &world.prompts[2..] {
        assert_eq!(prompt.matches(POLICY_REMEDIATION_PHRASE).count(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_cooldown_is_paid_once() {
    let harness = Harness::new(vec![Reply::Text(RATE_LIMIT_TEXT), Reply::Image]);
    let mut app = harness.app(CancellationToken::new());

    let started = Instant::now();
    let report = app.run(&requests(1), &job()).await.unwrap();
    let elapsed = started.elapsed();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.attempt_count(), 2);
    assert_eq!(
        outcome.attempts[0].diagnosis,
        Diagnosis::RateLimit {
            cooldown_ms: Some(300_000)
        }
    );
    assert_eq!(outcome.attempts[1].diagnosis, Diagnosis::None);
    assert!(elapsed >= Duration::from_secs(299), "elapsed = {:?}", elapsed);
    // 冷却只等待一次
    assert!(elapsed < Duration::from_secs(600), "elapsed = {:?}", elapsed);
    assert_eq!(report.session_resets, 1);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_unknown_failure_exhausts_and_aborts() {
    let harness = Harness::new(vec![Reply::Broken; 10]);
    let mut app = harness.app(CancellationToken::new());

    let err = app.run(&requests(2), &job()).await.unwrap_err();

    assert!(matches!(
        err,
        AppError::RetryExhausted {
            index: 1,
            attempts: 10,
            delivered: 0
        }
    ));

    let world = harness.world();
    // 第 2 个请求从未提交
    assert_eq!(world.prompts.len(), 10);
    assert!(world.prompts.iter().all(|p| p.contains("scene 1")));
    assert_eq!(world.screenshots, vec![harness.config.screenshot_path.clone()]);
    assert_eq!(world.launches, 10);
    assert_eq!(world.closes, 10);
}

#[tokio::test(start_paused = true)]
async fn test_text_reply_without_keywords_is_timeout() {
    let harness = Harness::new(vec![Reply::Text(UNRELATED_TEXT), Reply::Image]);
    let mut app = harness.app(CancellationToken::new());

    let report = app.run(&requests(1), &job()).await.unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.attempts[0].diagnosis, Diagnosis::Timeout);
    assert_eq!(outcome.attempt_count(), 2);
    assert_eq!(report.session_resets, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_error_revalidates_and_retries_request() {
    let harness = Harness::new(vec![Reply::Image]);
    harness.world().fail_staging = 1;
    let mut app = harness.app(CancellationToken::new());

    let report = app.run(&requests(1), &job()).await.unwrap();

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.session_resets, 1);
    assert!(!report.outcomes[0].recovered_after_error);
    assert!(harness.output(1).exists());

    let world = harness.world();
    assert_eq!(world.prompts.len(), 1);
    assert!(!world.prompts[0].contains(POLICY_REMEDIATION_PHRASE));
}

#[tokio::test(start_paused = true)]
async fn test_non_empty_download_area_is_rejected() {
    let harness = Harness::new(vec![]);
    std::fs::create_dir_all(&harness.config.downloads_dir).unwrap();
    std::fs::write(harness.config.downloads_dir.join("leftover.png"), b"png").unwrap();
    let mut app = harness.app(CancellationToken::new());

    let err = app.run(&requests(1), &job()).await.unwrap_err();

    assert!(matches!(err, AppError::DownloadAreaNotEmpty { count: 1, .. }));
    assert_eq!(harness.world().launches, 0);
}

#[tokio::test(start_paused = true)]
async fn test_leftover_in_staging_dir_is_rejected() {
    let harness = Harness::new(vec![Reply::Image]);
    let stale = harness.config.downloads_dir.join("request-001-attempt-01");
    std::fs::create_dir_all(&stale).unwrap();
    std::fs::write(stale.join("old-run.png"), b"STALE").unwrap();
    let mut app = harness.app(CancellationToken::new());

    let err = app.run(&requests(1), &job()).await.unwrap_err();

    assert!(matches!(err, AppError::DownloadAreaNotEmpty { count: 1, .. }));
    assert_eq!(harness.world().launches, 0);
    assert!(!harness.output(1).exists());
}

#[tokio::test(start_paused = true)]
async fn test_staging_dirs_are_removed_after_each_attempt() {
    let harness = Harness::new(vec![Reply::Text(UNRELATED_TEXT), Reply::Image, Reply::Image]);
    let mut app = harness.app(CancellationToken::new());

    let report = app.run(&requests(2), &job()).await.unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert!(harness.staging_dirs().is_empty(), "{:?}", harness.staging_dirs());
    assert_eq!(std::fs::read(harness.output(1)).unwrap(), b"png");

    // 下一次运行可以直接使用同一个下载目录
    let rerun = Harness {
        _dir: tempfile::tempdir().unwrap(),
        config: harness.config.clone(),
        world: Arc::new(Mutex::new(World::default())),
    };
    let mut app = rerun.app(CancellationToken::new());
    assert!(app.run(&requests(1), &job()).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_oversized_cooldown_is_clamped() {
    let harness = Harness::new(vec![
        Reply::Text("Rate limit reached. Try again in 999999999999999 minutes."),
        Reply::Image,
    ]);
    let mut app = harness.app(CancellationToken::new());

    let started = Instant::now();
    let report = app.run(&requests(1), &job()).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(
        report.outcomes[0].attempts[0].diagnosis,
        Diagnosis::RateLimit {
            cooldown_ms: Some(1_800_000)
        }
    );
    assert!(elapsed >= Duration::from_secs(1_799), "elapsed = {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(2_400), "elapsed = {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_image_downloaded_before_crash_is_kept() {
    let harness = Harness::new(vec![Reply::ImageThenCrash, Reply::Image]);
    let mut app = harness.app(CancellationToken::new());

    let report = app.run(&requests(2), &job()).await.unwrap();

    let first = &report.outcomes[0];
    assert!(first.recovered_after_error);
    assert!(first.attempts.is_empty());
    assert!(!report.outcomes[1].recovered_after_error);
    assert!(harness.output(1).exists());
    assert!(harness.output(2).exists());
    assert_eq!(report.session_resets, 1);

    let world = harness.world();
    // 第 1 个请求没有重新提交
    assert_eq!(world.prompts.len(), 2);
    assert!(world.prompts[1].contains("scene 2"));
    assert_eq!(world.launches, 2);
}

#[tokio::test(start_paused = true)]
async fn test_first_extra_download_resets_and_retries() {
    let harness = Harness::new(vec![Reply::DoubleImage, Reply::Image]);
    let mut app = harness.app(CancellationToken::new());

    let report = app.run(&requests(1), &job()).await.unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.attempt_count(), 2);
    assert_eq!(outcome.attempts[0].diagnosis, Diagnosis::ArtifactCountMismatch);
    assert_eq!(outcome.attempts[1].diagnosis, Diagnosis::None);
    assert_eq!(report.session_resets, 1);
    assert!(harness.output(1).exists());
    assert!(harness.staging_dirs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_extra_download_is_fatal() {
    let harness = Harness::new(vec![Reply::DoubleImage, Reply::DoubleImage]);
    let mut app = harness.app(CancellationToken::new());

    let err = app.run(&requests(1), &job()).await.unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(err, AppError::ArtifactCountMismatch { found: 2, .. }));
    assert!(!harness.output(1).exists());
    // 出错的暂存目录保留给人工排查
    assert_eq!(harness.staging_dirs().len(), 1);

    let world = harness.world();
    assert_eq!(world.launches, 2);
    assert_eq!(world.screenshots, vec![harness.config.screenshot_path.clone()]);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_is_capped() {
    let harness = Harness::new(vec![]);
    harness.world().fail_staging = 10;
    let mut app = harness.app(CancellationToken::new());

    let err = app.run(&requests(1), &job()).await.unwrap_err();

    assert!(matches!(
        err,
        AppError::RetryExhausted {
            index: 1,
            attempts: 10,
            delivered: 0
        }
    ));
    let world = harness.world();
    assert_eq!(world.launches, 10);
    assert!(world.prompts.is_empty());
    assert!(harness.staging_dirs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_prompt_typed_character_by_character() {
    let harness = Harness::with_config(vec![Reply::Image], |config| {
        config.paste_prompts = false;
        config.typing_speed = TypingSpeed::Slow;
    });
    let mut app = harness.app(CancellationToken::new());
    let batch = requests(1);
    let expected = batch[0].render_prompt(job().content_type, &job().style);

    let started = Instant::now();
    let report = app.run(&batch, &job()).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.outcomes.len(), 1);
    let world = harness.world();
    assert!(world.prompts.is_empty());
    assert_eq!(world.typed, expected);
    // 慢速输入每个字符平均停顿数百毫秒
    let floor = Duration::from_millis(200) * expected.chars().count() as u32;
    assert!(elapsed >= floor, "elapsed = {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_aborts_batch() {
    let harness = Harness::new(vec![Reply::Image]);
    let cancel = CancellationToken::new();
    let mut app = harness.app(cancel.clone());
    cancel.cancel();

    let err = app.run(&requests(1), &job()).await.unwrap_err();

    assert!(matches!(err, AppError::Cancelled));
    let world = harness.world();
    assert!(world.prompts.is_empty());
    assert_eq!(world.closes, world.launches);
}

struct FailingLauncher;

#[async_trait]
impl BrowserLauncher for FailingLauncher {
    async fn launch(&self) -> AppResult<Box<dyn BrowserPage>> {
        Err(LaunchError::ProcessFailed {
            reason: "chrome exited".to_string(),
        }
        .into())
    }
}

#[tokio::test(start_paused = true)]
async fn test_launch_failure_is_fatal() {
    let harness = Harness::new(vec![]);
    let humanizer = Arc::new(Humanizer::seeded(3, CancellationToken::new()));
    let mut app = App::with_launcher(harness.config.clone(), FailingLauncher, humanizer).unwrap();

    let err = app.run(&requests(1), &job()).await.unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(err, AppError::Launch(LaunchError::ProcessFailed { .. })));
}

#[test]
fn test_session_close_is_idempotent() {
    let harness = Harness::new(vec![]);
    let launcher = FakeLauncher {
        world: harness.world.clone(),
    };
    let humanizer = Arc::new(Humanizer::seeded(5, CancellationToken::new()));
    let mut session = SessionManager::new(launcher, SessionSettings::from(&harness.config), humanizer);

    tokio_test::block_on(async {
        session.close().await;
        assert_eq!(harness.world().closes, 0);

        session.open().await.unwrap();
        assert!(session.is_open());
        // 已打开时再次打开不会启动新浏览器
        session.open().await.unwrap();

        session.close().await;
        session.close().await;
    });

    assert!(!session.is_open());
    assert_eq!(session.reset_count(), 0);
    let world = harness.world();
    assert_eq!(world.launches, 1);
    assert_eq!(world.closes, 1);
    assert_eq!(world.download_dir.as_deref(), Some(harness.config.downloads_dir.as_path()));
}

#[tokio::test(start_paused = true)]
async fn test_reset_on_closed_session_opens_fresh_one() {
    let harness = Harness::new(vec![]);
    let launcher = FakeLauncher {
        world: harness.world.clone(),
    };
    let humanizer = Arc::new(Humanizer::seeded(6, CancellationToken::new()));
    let mut session = SessionManager::new(launcher, SessionSettings::from(&harness.config), humanizer);

    session.reset().await.unwrap();

    assert!(session.is_open());
    assert_eq!(session.reset_count(), 1);
    assert_eq!(session.handle_mut().unwrap().response_count, 0);
    assert_eq!(harness.world().closes, 0);
}
