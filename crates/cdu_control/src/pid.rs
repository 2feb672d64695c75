use cdu_config::PidSettings;

/// Discrete PID with no anti-windup and no derivative filter, grounded in
/// the teacher's `PidHelper`. Output is clamped to `[output_min,
/// output_max]` from configuration on every step.
#[derive(Debug, Clone, Copy)]
pub struct Pid {
    kp: f64,
    ki: f64,
    kd: f64,
    dt: f64,
    output_min: f64,
    output_max: f64,
    previous_error: f64,
    integral: f64,
}

impl Pid {
    pub fn new(settings: PidSettings) -> Self {
        Self {
            kp: settings.kp,
            ki: settings.ki,
            kd: settings.kd,
            dt: settings.dt,
            output_min: settings.output_min,
            output_max: settings.output_max,
            previous_error: 0.0,
            integral: 0.0,
        }
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// One PID step. `is_add=true` drives `error = target - measured`
    /// (pumps, pressure); `is_add=false` drives `error = measured - target`
    /// (the proportional valve's temperature loop). `bias` is added to the
    /// P+I+D sum before clamping — the prior step's own output in the
    /// control loops that call this.
    pub fn calculate(&mut self, target: f64, measured: f64, bias: f64, is_add: bool) -> f64 {
        let error = if is_add { target - measured } else { measured - target };

        let proportional = self.kp * error;
        self.integral += error * self.dt;
        let integral_term = self.ki * self.integral;
        let derivative = (error - self.previous_error) / self.dt;
        let derivative_term = self.kd * derivative;

        let output = proportional + integral_term + derivative_term + bias;
        let output = output.clamp(self.output_min, self.output_max);

        self.previous_error = error;
        output
    }

    /// Zeroes only `previous_error` and `integral`; gains and clamp bounds
    /// are untouched.
    pub fn reset(&mut self) {
        self.previous_error = 0.0;
        self.integral = 0.0;
    }
}
