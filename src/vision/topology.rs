//! Keypoint topologies for hand and body pose models.

/// Number of hand landmarks.
pub const HAND_LANDMARK_COUNT: usize = 21;

/// Number of body pose landmarks.
pub const POSE_LANDMARK_COUNT: usize = 33;

/// Hand joints in model output order.
pub const HAND_LANDMARK_NAMES: [&str; HAND_LANDMARK_COUNT] = [
  "wrist",
  "thumb_cmc",
  "thumb_mcp",
  "thumb_ip",
  "thumb_tip",
  "index_finger_mcp",
  "index_finger_pip",
  "index_finger_dip",
  "index_finger_tip",
  "middle_finger_mcp",
  "middle_finger_pip",
  "middle_finger_dip",
  "middle_finger_tip",
  "ring_finger_mcp",
  "ring_finger_pip",
  "ring_finger_dip",
  "ring_finger_tip",
  "pinky_mcp",
  "pinky_pip",
  "pinky_dip",
  "pinky_tip",
];

/// Bones of the hand skeleton as landmark index pairs.
pub const HAND_CONNECTIONS: [(usize, usize); 21] = [
  (0, 1),
  (1, 2),
  (2, 3),
  (3, 4),
  (0, 5),
  (5, 6),
  (6, 7),
  (7, 8),
  (5, 9),
  (9, 10),
  (10, 11),
  (11, 12),
  (9, 13),
  (13, 14),
  (14, 15),
  (15, 16),
  (13, 17),
  (0, 17),
  (17, 18),
  (18, 19),
  (19, 20),
];

/// Body landmarks in model output order.
pub const POSE_LANDMARK_NAMES: [&str; POSE_LANDMARK_COUNT] = [
  "nose",
  "left_eye_inner",
  "left_eye",
  "left_eye_outer",
  "right_eye_inner",
  "right_eye",
  "right_eye_outer",
  "left_ear",
  "right_ear",
  "mouth_left",
  "mouth_right",
  "left_shoulder",
  "right_shoulder",
  "left_elbow",
  "right_elbow",
  "left_wrist",
  "right_wrist",
  "left_pinky",
  "right_pinky",
  "left_index",
  "right_index",
  "left_thumb",
  "right_thumb",
  "left_hip",
  "right_hip",
  "left_knee",
  "right_knee",
  "left_ankle",
  "right_ankle",
  "left_heel",
  "right_heel",
  "left_foot_index",
  "right_foot_index",
];

/// Bones of the body skeleton as landmark index pairs.
pub const POSE_CONNECTIONS: [(usize, usize); 35] = [
  (0, 1),
  (1, 2),
  (2, 3),
  (3, 7),
  (0, 4),
  (4, 5),
  (5, 6),
  (6, 8),
  (9, 10),
  (11, 12),
  (11, 13),
  (13, 15),
  (15, 17),
  (15, 19),
  (15, 21),
  (17, 19),
  (12, 14),
  (14, 16),
  (16, 18),
  (16, 20),
  (16, 22),
  (18, 20),
  (11, 23),
  (12, 24),
  (23, 24),
  (23, 25),
  (24, 26),
  (25, 27),
  (26, 28),
  (27, 29),
  (28, 30),
  (29, 31),
  (30, 32),
  (27, 31),
  (28, 32),
];

/// Joint name for hand landmark `index`.
pub fn hand_landmark_name(index: usize) -> Option<&'static str> {
  HAND_LANDMARK_NAMES.get(index).copied()
}

/// Joint name for pose landmark `index`.
pub fn pose_landmark_name(index: usize) -> Option<&'static str> {
  POSE_LANDMARK_NAMES.get(index).copied()
}
