use tokio::sync::watch;

/// Owning half of the shutdown signal. Dropping it also fires the signal.
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown { rx: self.tx.subscribe() }
    }
}

impl Drop for ShutdownTrigger {
    fn drop(&mut self) {
        self.trigger();
    }
}

/// Observed by every background loop. Blocking threads poll `is_triggered`, async tasks await `recv`.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn recv(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_is_seen_by_every_clone() {
        let (trigger, shutdown) = channel();
        let other = shutdown.clone();
        assert!(!shutdown.is_triggered());

        trigger.trigger();
        assert!(shutdown.is_triggered());
        assert!(other.is_triggered());
    }

    #[test]
    fn dropping_the_trigger_fires() {
        let (trigger, shutdown) = channel();
        drop(trigger);
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn recv_wakes_up_on_trigger() {
        let (trigger, mut shutdown) = channel();
        let handle = tokio::spawn(async move {
            shutdown.recv().await;
            true
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        trigger.trigger();
        assert!(handle.await.unwrap());
    }
}
