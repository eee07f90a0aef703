//! 预定义的常用拦截器
//!
//! - [`TracingInterceptor`]：记录方法进入和退出
//! - [`PerformanceMonitorInterceptor`]：记录耗时，超过阈值时告警
//! - [`ExceptionLoggingInterceptor`]：记录失败的调用，错误原样抛出

use std::time::Instant;

use sprig_core::{ErrorKind, InvocationResult};

use crate::advice::MethodInterceptor;
use crate::error_info::ErrorInfo;
use crate::joinpoint::MethodInvocation;

/// 方法调用跟踪
#[derive(Debug, Default, Clone)]
pub struct TracingInterceptor {
    log_args: bool,
}

impl TracingInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同时记录参数个数
    pub fn with_args(mut self) -> Self {
        self.log_args = true;
        self
    }
}

impl MethodInterceptor for TracingInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation<'_>) -> InvocationResult {
        let description = invocation.join_point().short_description();
        if self.log_args {
            tracing::debug!(
                "Entering: {} with {} argument(s)",
                description,
                invocation.arguments().len()
            );
        } else {
            tracing::debug!("Entering: {}", description);
        }

        let started = Instant::now();
        let result = invocation.proceed();
        match &result {
            Ok(_) => tracing::debug!("Exiting: {} (took {:?})", description, started.elapsed()),
            Err(e) => tracing::debug!("Exception thrown in {}: {}", description, e),
        }
        result
    }

    fn name(&self) -> &str {
        "TracingInterceptor"
    }
}

/// 性能监控
#[derive(Debug, Clone)]
pub struct PerformanceMonitorInterceptor {
    threshold_ms: u128,
}

impl PerformanceMonitorInterceptor {
    pub fn new(threshold_ms: u128) -> Self {
        Self { threshold_ms }
    }

    pub fn threshold_ms(&self) -> u128 {
        self.threshold_ms
    }
}

impl MethodInterceptor for PerformanceMonitorInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation<'_>) -> InvocationResult {
        let started = Instant::now();
        let result = invocation.proceed();
        let elapsed = started.elapsed().as_millis();

        let signature = invocation.join_point().signature();
        if elapsed > self.threshold_ms {
            tracing::warn!(
                "Slow method detected: {} took {}ms (threshold: {}ms)",
                signature,
                elapsed,
                self.threshold_ms
            );
        } else {
            tracing::trace!("StopWatch '{}': running time = {}ms", signature, elapsed);
        }
        result
    }

    fn name(&self) -> &str {
        "PerformanceMonitorInterceptor"
    }
}

/// 失败调用记录：非受检错误记为 error，受检错误记为 warn
#[derive(Debug, Default, Clone, Copy)]
pub struct ExceptionLoggingInterceptor;

impl MethodInterceptor for ExceptionLoggingInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation<'_>) -> InvocationResult {
        let result = invocation.proceed();
        if let Err(error) = &result {
            let info = ErrorInfo::from_invocation_error(error);
            let signature = invocation.join_point().signature();
            match error.kind() {
                ErrorKind::Unchecked => tracing::error!("Exception in {}: {}", signature, info.full_description()),
                ErrorKind::Checked => tracing::warn!("{} failed: {}", signature, info.full_description()),
            }
        }
        result
    }

    fn name(&self) -> &str {
        "ExceptionLoggingInterceptor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainElement;
    use parking_lot::Mutex;
    use sprig_core::{args, ret, Arguments, CallContext, InvocationError, Method, MethodDispatch};
    use std::io;
    use std::sync::Arc;
    use std::time::Duration;

    const LOAD: Method = Method::new("Loader", "load");

    struct SlowLoader;

    impl MethodDispatch for SlowLoader {
        fn target_class(&self) -> &'static str {
            "app::SlowLoader"
        }

        fn methods(&self) -> Vec<Method> {
            vec![LOAD]
        }

        fn invoke(&self, _ctx: &mut CallContext, _method: &Method, args: &mut Arguments) -> InvocationResult {
            let millis = *args.arg::<u64>(0)?;
            if millis == 0 {
                return Err(InvocationError::unchecked(anyhow::anyhow!("nothing to load")));
            }
            std::thread::sleep(Duration::from_millis(millis));
            ret(millis)
        }
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn run_logged(interceptor: Arc<dyn MethodInterceptor>, millis: u64) -> (InvocationResult, String) {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let result = tracing::subscriber::with_default(subscriber, || {
            let mut ctx = CallContext::new();
            let mut args = args![millis];
            let target: Arc<dyn MethodDispatch> = Arc::new(SlowLoader);
            let chain: Vec<ChainElement> = vec![ChainElement::Static(interceptor)];
            MethodInvocation::new(Some(target), "app::SlowLoader", LOAD, &mut args, &mut ctx, chain.into()).proceed()
        });
        let output = String::from_utf8_lossy(&captured.0.lock()).into_owned();
        (result, output)
    }

    #[test]
    fn test_tracing_interceptor_logs_entry_and_exit() {
        let (result, output) = run_logged(Arc::new(TracingInterceptor::new().with_args()), 1);
        assert!(result.is_ok());
        assert!(output.contains("Entering: SlowLoader -> Loader.load with 1 argument(s)"));
        assert!(output.contains("Exiting: SlowLoader -> Loader.load"));
    }

    #[test]
    fn test_performance_monitor_warns_above_threshold() {
        let (_, output) = run_logged(Arc::new(PerformanceMonitorInterceptor::new(0)), 5);
        assert!(output.contains("Slow method detected: Loader.load"));

        let (_, output) = run_logged(Arc::new(PerformanceMonitorInterceptor::new(60_000)), 1);
        assert!(!output.contains("Slow method detected"));
        assert!(output.contains("StopWatch 'Loader.load'"));
    }

    #[test]
    fn test_exception_logging_rethrows() {
        let (result, output) = run_logged(Arc::new(ExceptionLoggingInterceptor), 0);
        assert!(!result.unwrap_err().is_checked());
        assert!(output.contains("Exception in Loader.load: nothing to load"));
    }
}
